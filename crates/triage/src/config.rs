//! Monitor configuration
//!
//! Loaded from `triage.json` in the triage config directory, then
//! overridden by `TRIAGE_*` environment variables:
//! - `TRIAGE_ACCOUNT`
//! - `TRIAGE_BACKLOG_LIMIT`
//! - `TRIAGE_POLL_INTERVAL_SECS`
//! - `TRIAGE_FILTER` (`all` or `unseen`)
//! - `TRIAGE_MARK_CONSUMED` (`true`/`false`/`1`/`0`)
//! - `TRIAGE_HISTORY_DIR`

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::credentials::{
    CredentialProvider, GmailCredentials, StaticBearer, StaticPassword, TokenFile,
};
use crate::identity::MailboxIdentity;
use crate::source::{DEFAULT_IMAP_PORT, GmailSource, ImapSource, ListFilter, MailboxSource};
use crate::sync::{CycleOptions, FailurePolicy, Schedule};

/// Config filename in the triage config directory
pub const CONFIG_FILE: &str = "triage.json";

const ENV_PREFIX: &str = "TRIAGE_";

/// Where messages come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    Imap {
        host: String,
        #[serde(default = "default_imap_port")]
        port: u16,
        /// Login name; defaults to the account
        #[serde(default)]
        username: Option<String>,
        #[serde(default = "default_mailbox")]
        mailbox: String,
        auth: AuthConfig,
    },
    Gmail {
        /// Stored OAuth token; defaults to `gmail-tokens.json` in the config dir
        #[serde(default)]
        token_path: Option<PathBuf>,
    },
}

/// How an IMAP source authenticates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Password read from an environment variable
    PasswordEnv { var: String },
    /// Bearer token read from an environment variable (XOAUTH2)
    BearerEnv { var: String },
    /// Stored OAuth token file (XOAUTH2)
    TokenFile {
        #[serde(default)]
        path: Option<PathBuf>,
    },
}

/// Which classifier backend to load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClassifierConfig {
    /// Local linear text model exported as JSON
    Linear { model_path: PathBuf },
    /// Remote text-classification endpoint
    Http {
        endpoint: String,
        /// Environment variable holding the bearer token, if any
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
    },
}

/// Serialized form of [`FailurePolicy`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FailurePolicyConfig {
    #[default]
    Stop,
    Backoff {
        #[serde(default = "default_backoff_max")]
        max_secs: u64,
    },
}

impl From<FailurePolicyConfig> for FailurePolicy {
    fn from(config: FailurePolicyConfig) -> Self {
        match config {
            FailurePolicyConfig::Stop => FailurePolicy::Stop,
            FailurePolicyConfig::Backoff { max_secs } => FailurePolicy::Backoff {
                max: Duration::from_secs(max_secs),
            },
        }
    }
}

/// Top-level monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageConfig {
    /// Account identifier; hashed into the mailbox identity
    pub account: String,
    pub source: SourceConfig,
    pub classifier: ClassifierConfig,
    #[serde(default = "default_backlog_limit")]
    pub backlog_limit: usize,
    /// Gmail listing size
    #[serde(default = "default_listing_window")]
    pub listing_window: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub filter: ListFilter,
    #[serde(default)]
    pub mark_consumed: bool,
    /// History database directory; defaults to the triage data dir
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
    #[serde(default)]
    pub failure_policy: FailurePolicyConfig,
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

fn default_http_timeout() -> u64 {
    30
}

fn default_backoff_max() -> u64 {
    300
}

fn default_backlog_limit() -> usize {
    50
}

fn default_listing_window() -> usize {
    100
}

fn default_poll_interval() -> u64 {
    10
}

impl TriageConfig {
    /// Load `triage.json` from the config directory and apply env overrides
    pub fn load() -> Result<Self> {
        let mut config: Self = config::load_json(CONFIG_FILE)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific path and apply env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config: Self = config::load_json_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from a JSON string without env overrides
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse triage config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `TRIAGE_*` overrides using `lookup` to read variables
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| {
            let key = format!("{}{}", ENV_PREFIX, name);
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("ACCOUNT") {
            self.account = value;
        }
        if let Some((key, value)) = var("BACKLOG_LIMIT") {
            self.backlog_limit = value
                .parse()
                .with_context(|| format!("{} must be a number, got {:?}", key, value))?;
        }
        if let Some((key, value)) = var("POLL_INTERVAL_SECS") {
            self.poll_interval_secs = value
                .parse()
                .with_context(|| format!("{} must be a number, got {:?}", key, value))?;
        }
        if let Some((key, value)) = var("FILTER") {
            self.filter = match value.to_ascii_lowercase().as_str() {
                "all" => ListFilter::All,
                "unseen" => ListFilter::Unseen,
                _ => bail!("{} must be 'all' or 'unseen', got {:?}", key, value),
            };
        }
        if let Some((key, value)) = var("MARK_CONSUMED") {
            self.mark_consumed = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => bail!("{} must be true or false, got {:?}", key, value),
            };
        }
        if let Some((_, value)) = var("HISTORY_DIR") {
            self.history_dir = Some(PathBuf::from(value));
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.account.trim().is_empty() {
            bail!("account must not be empty");
        }
        if self.backlog_limit == 0 {
            bail!("backlog_limit must be at least 1");
        }
        if self.listing_window == 0 {
            bail!("listing_window must be at least 1");
        }
        Ok(())
    }

    pub fn identity(&self) -> MailboxIdentity {
        MailboxIdentity::new(&self.account)
    }

    pub fn cycle_options(&self) -> CycleOptions {
        CycleOptions {
            filter: self.filter,
            backlog_limit: self.backlog_limit,
            mark_consumed: self.mark_consumed,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// `Once` for single-shot runs, otherwise repeat at the poll interval
    pub fn schedule(&self, once: bool) -> Schedule {
        if once {
            Schedule::Once
        } else {
            Schedule::Every(self.poll_interval())
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy.into()
    }

    /// Directory holding per-identity history databases
    pub fn history_dir(&self) -> Result<PathBuf> {
        match &self.history_dir {
            Some(dir) => Ok(dir.clone()),
            None => config::data_dir().context("Could not determine data directory"),
        }
    }

    /// Build the configured mailbox source
    pub fn build_source(&self) -> Result<Arc<dyn MailboxSource>> {
        match &self.source {
            SourceConfig::Imap {
                host,
                port,
                username,
                mailbox,
                auth,
            } => {
                let username = username.clone().unwrap_or_else(|| self.account.clone());
                let credentials = auth.provider()?;
                Ok(Arc::new(ImapSource::new(
                    host.clone(),
                    *port,
                    username,
                    mailbox.clone(),
                    credentials,
                )))
            }
            SourceConfig::Gmail { token_path } => {
                let credentials = token_file(token_path.as_deref())?;
                Ok(Arc::new(GmailSource::new(credentials, self.listing_window)))
            }
        }
    }
}

impl AuthConfig {
    /// Build the credential provider for this auth method
    pub fn provider(&self) -> Result<Arc<dyn CredentialProvider>> {
        match self {
            AuthConfig::PasswordEnv { var } => Ok(Arc::new(StaticPassword::from_env(var)?)),
            AuthConfig::BearerEnv { var } => {
                let token = std::env::var(var)
                    .with_context(|| format!("{} environment variable not set", var))?;
                Ok(Arc::new(StaticBearer::new(token)))
            }
            AuthConfig::TokenFile { path } => token_file(path.as_deref()),
        }
    }
}

fn token_file(path: Option<&Path>) -> Result<Arc<dyn CredentialProvider>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => TokenFile::default_path()?,
    };

    // Refresh needs OAuth client credentials; without them the stored token
    // is used until it expires
    let client = match GmailCredentials::load() {
        Ok(client) => Some(client),
        Err(e) => {
            debug!("No OAuth client credentials, token refresh disabled: {}", e);
            None
        }
    };

    Ok(Arc::new(TokenFile::new(path, client)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const IMAP_CONFIG: &str = r#"{
        "account": "Alice@Example.com",
        "source": {
            "type": "imap",
            "host": "imap.example.com",
            "auth": { "type": "password_env", "var": "TRIAGE_TEST_PASSWORD" }
        },
        "classifier": { "type": "linear", "model_path": "/models/priority.json" }
    }"#;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = TriageConfig::from_json(IMAP_CONFIG).unwrap();

        assert_eq!(config.backlog_limit, 50);
        assert_eq!(config.listing_window, 100);
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.filter, ListFilter::Unseen);
        assert!(!config.mark_consumed);
        assert_eq!(config.failure_policy(), FailurePolicy::Stop);

        match &config.source {
            SourceConfig::Imap {
                port,
                mailbox,
                username,
                ..
            } => {
                assert_eq!(*port, 993);
                assert_eq!(mailbox, "INBOX");
                assert!(username.is_none());
            }
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_gmail_and_http_classifier() {
        let json = r#"{
            "account": "bob@gmail.com",
            "source": { "type": "gmail" },
            "classifier": {
                "type": "http",
                "endpoint": "https://models.example.com/priority",
                "token_env": "MODEL_TOKEN"
            },
            "filter": "all",
            "failure_policy": { "type": "backoff", "max_secs": 120 }
        }"#;
        let config = TriageConfig::from_json(json).unwrap();

        assert_eq!(config.source, SourceConfig::Gmail { token_path: None });
        assert_eq!(
            config.classifier,
            ClassifierConfig::Http {
                endpoint: "https://models.example.com/priority".to_string(),
                token_env: Some("MODEL_TOKEN".to_string()),
                timeout_secs: 30,
            }
        );
        assert_eq!(config.filter, ListFilter::All);
        assert_eq!(
            config.failure_policy(),
            FailurePolicy::Backoff {
                max: Duration::from_secs(120)
            }
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TriageConfig::from_json(IMAP_CONFIG).unwrap();
        config
            .apply_overrides(env(&[
                ("TRIAGE_ACCOUNT", "carol@example.com"),
                ("TRIAGE_BACKLOG_LIMIT", "20"),
                ("TRIAGE_FILTER", "ALL"),
                ("TRIAGE_MARK_CONSUMED", "1"),
                ("TRIAGE_HISTORY_DIR", "/tmp/triage-history"),
            ]))
            .unwrap();

        assert_eq!(config.account, "carol@example.com");
        assert_eq!(config.backlog_limit, 20);
        assert_eq!(config.filter, ListFilter::All);
        assert!(config.mark_consumed);
        assert_eq!(
            config.history_dir().unwrap(),
            PathBuf::from("/tmp/triage-history")
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = TriageConfig::from_json(IMAP_CONFIG).unwrap();
        let err = config
            .apply_overrides(env(&[("TRIAGE_BACKLOG_LIMIT", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("TRIAGE_BACKLOG_LIMIT"));

        assert!(
            config
                .apply_overrides(env(&[("TRIAGE_FILTER", "flagged")]))
                .is_err()
        );
    }

    #[test]
    fn test_validation() {
        let json = IMAP_CONFIG.replace("\"Alice@Example.com\"", "\"  \"");
        assert!(TriageConfig::from_json(&json).is_err());

        let json = IMAP_CONFIG.replace(
            "\"account\"",
            "\"backlog_limit\": 0, \"account\"",
        );
        assert!(TriageConfig::from_json(&json).is_err());
    }

    #[test]
    fn test_identity_normalizes_account() {
        let config = TriageConfig::from_json(IMAP_CONFIG).unwrap();
        assert_eq!(
            config.identity(),
            MailboxIdentity::new("alice@example.com")
        );
    }

    #[test]
    fn test_schedule() {
        let config = TriageConfig::from_json(IMAP_CONFIG).unwrap();
        assert_eq!(config.schedule(true), Schedule::Once);
        assert_eq!(
            config.schedule(false),
            Schedule::Every(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_cycle_options() {
        let config = TriageConfig::from_json(IMAP_CONFIG).unwrap();
        let options = config.cycle_options();
        assert_eq!(options.backlog_limit, 50);
        assert_eq!(options.filter, ListFilter::Unseen);
        assert!(!options.mark_consumed);
    }
}
