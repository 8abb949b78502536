//! Credential providers for mailbox sources
//!
//! Credentials are obtained out of band; this module only reads what is
//! already there:
//! - a static password (config or environment)
//! - a static bearer token
//! - a stored OAuth token file, refreshed with the client credentials when
//!   it is about to expire
//!
//! There is no interactive authorization flow here. A token file has to be
//! produced by some other tool first.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Credentials filename in the triage config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Google OAuth2 token endpoint
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Tokens this close to expiry are refreshed before use
const EXPIRY_MARGIN_SECS: i64 = 300;

/// A secret a mailbox source can authenticate with
#[derive(Clone, PartialEq)]
pub enum Credential {
    /// OAuth2 access token (IMAP XOAUTH2 or REST bearer auth)
    Bearer {
        token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    /// Plain password or app password (IMAP LOGIN)
    Password(String),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer { expires_at, .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .field("expires_at", expires_at)
                .finish(),
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
        }
    }
}

/// Supplies a current credential each time a source connects
pub trait CredentialProvider: Send + Sync {
    fn credential(&self) -> Result<Credential>;
}

/// Fixed password
pub struct StaticPassword {
    secret: String,
}

impl StaticPassword {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Read the password from an environment variable
    pub fn from_env(var: &str) -> Result<Self> {
        let secret =
            std::env::var(var).with_context(|| format!("{} environment variable not set", var))?;
        Ok(Self::new(secret))
    }
}

impl CredentialProvider for StaticPassword {
    fn credential(&self) -> Result<Credential> {
        Ok(Credential::Password(self.secret.clone()))
    }
}

/// Fixed bearer token with no refresh
pub struct StaticBearer {
    token: String,
}

impl StaticBearer {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl CredentialProvider for StaticBearer {
    fn credential(&self) -> Result<Credential> {
        Ok(Credential::Bearer {
            token: self.token.clone(),
            expires_at: None,
        })
    }
}

/// Stored token data
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    /// Unix timestamp in seconds
    expires_at: Option<i64>,
}

/// Token response from the token endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// OAuth token stored on disk, refreshed in place
pub struct TokenFile {
    path: PathBuf,
    client: Option<GmailCredentials>,
}

impl TokenFile {
    /// Default token location (~/.config/triage/gmail-tokens.json)
    pub fn default_path() -> Result<PathBuf> {
        config::config_path("gmail-tokens.json").context("Could not determine config directory")
    }

    /// `client` is needed only to refresh; without it an expired token is an error
    pub fn new(path: PathBuf, client: Option<GmailCredentials>) -> Self {
        Self { path, client }
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read token file: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse token file: {}", self.path.display()))
    }

    fn save_token(&self, token: &StoredToken) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(token)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Failed to write token file: {}", self.path.display()))?;
        Ok(())
    }

    fn refresh(&self, client: &GmailCredentials, refresh_token: &str) -> Result<StoredToken> {
        let response = ureq::post(TOKEN_URL)
            .send_form([
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        Ok(StoredToken {
            access_token: token.access_token,
            // Preserve the refresh token if not returned
            refresh_token: token
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: token
                .expires_in
                .map(|d| Utc::now().timestamp() + d as i64),
        })
    }
}

fn is_fresh(token: &StoredToken) -> bool {
    match token.expires_at {
        Some(expires_at) => expires_at > Utc::now().timestamp() + EXPIRY_MARGIN_SECS,
        // No expiry recorded: use as-is and let the server reject it
        None => true,
    }
}

fn to_credential(token: StoredToken) -> Credential {
    Credential::Bearer {
        token: token.access_token,
        expires_at: token
            .expires_at
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
    }
}

impl CredentialProvider for TokenFile {
    fn credential(&self) -> Result<Credential> {
        let token = self.load_token()?;
        if is_fresh(&token) {
            return Ok(to_credential(token));
        }

        debug!("Stored token expires soon, refreshing");
        let (Some(client), Some(refresh_token)) = (&self.client, &token.refresh_token) else {
            bail!(
                "Access token in {} has expired and cannot be refreshed",
                self.path.display()
            );
        };

        let refreshed = self.refresh(client, refresh_token)?;
        self.save_token(&refreshed)?;
        info!("Refreshed access token");
        Ok(to_credential(refreshed))
    }
}

/// OAuth client credentials for Gmail token refresh
#[derive(Debug, Clone)]
pub struct GmailCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Google Cloud Console credential file format (installed app)
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

impl GmailCredentials {
    /// Load credentials from, in order:
    /// 1. JSON file (~/.config/triage/google-credentials.json)
    /// 2. Environment variables
    pub fn load() -> Result<Self> {
        if config::config_exists(CREDENTIALS_FILE) {
            let creds: GoogleCredentialFile = config::load_json(CREDENTIALS_FILE)?;
            return Self::from_credential_file(creds);
        }

        Self::from_env()
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let creds: GoogleCredentialFile = config::load_json_file(path)?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds
            .installed
            .or(creds.web)
            .context("Credentials file missing 'installed' or 'web' section")?;

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
        })
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self> {
        let creds: GoogleCredentialFile =
            serde_json::from_str(json).context("Failed to parse credentials JSON")?;
        Self::from_credential_file(creds)
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self> {
        let client_id = std::env::var("GMAIL_CLIENT_ID")
            .context("GMAIL_CLIENT_ID environment variable not set")?;
        let client_secret = std::env::var("GMAIL_CLIENT_SECRET")
            .context("GMAIL_CLIENT_SECRET environment variable not set")?;

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    /// Check if credentials are available (file or env vars)
    pub fn is_available() -> bool {
        if config::config_exists(CREDENTIALS_FILE) {
            return true;
        }
        std::env::var("GMAIL_CLIENT_ID").is_ok() && std::env::var("GMAIL_CLIENT_SECRET").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn write_token(dir: &TempDir, token: &StoredToken) -> PathBuf {
        let path = dir.path().join("tokens.json");
        fs::write(&path, serde_json::to_string(token).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_fresh_token_used_directly() {
        let dir = TempDir::new().unwrap();
        let expires = Utc::now() + Duration::hours(1);
        let path = write_token(
            &dir,
            &StoredToken {
                access_token: "ya29.fresh".to_string(),
                refresh_token: None,
                expires_at: Some(expires.timestamp()),
            },
        );

        let credential = TokenFile::new(path, None).credential().unwrap();
        match credential {
            Credential::Bearer { token, expires_at } => {
                assert_eq!(token, "ya29.fresh");
                assert_eq!(expires_at.map(|t| t.timestamp()), Some(expires.timestamp()));
            }
            other => panic!("unexpected credential: {:?}", other),
        }
    }

    #[test]
    fn test_token_without_expiry_is_used() {
        let dir = TempDir::new().unwrap();
        let path = write_token(
            &dir,
            &StoredToken {
                access_token: "opaque".to_string(),
                refresh_token: None,
                expires_at: None,
            },
        );
        assert!(TokenFile::new(path, None).credential().is_ok());
    }

    #[test]
    fn test_expired_token_without_client_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_token(
            &dir,
            &StoredToken {
                access_token: "old".to_string(),
                refresh_token: Some("1//refresh".to_string()),
                expires_at: Some(Utc::now().timestamp() - 10),
            },
        );
        let err = TokenFile::new(path, None).credential().unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_missing_token_file_fails() {
        let dir = TempDir::new().unwrap();
        let provider = TokenFile::new(dir.path().join("missing.json"), None);
        assert!(provider.credential().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let password = format!("{:?}", Credential::Password("hunter2".to_string()));
        assert!(!password.contains("hunter2"));

        let bearer = format!(
            "{:?}",
            Credential::Bearer {
                token: "ya29.secret".to_string(),
                expires_at: None
            }
        );
        assert!(!bearer.contains("ya29.secret"));
    }

    #[test]
    fn test_static_providers() {
        assert_eq!(
            StaticPassword::new("pw").credential().unwrap(),
            Credential::Password("pw".to_string())
        );
        assert!(matches!(
            StaticBearer::new("tok").credential().unwrap(),
            Credential::Bearer { .. }
        ));
    }

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "token_uri": "https://oauth2.googleapis.com/token"
            }
        }"#;

        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{ "web": { "client_id": "web-id", "client_secret": "web-secret" } }"#;
        let creds = GmailCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-id");
    }

    #[test]
    fn test_invalid_credentials_json() {
        assert!(GmailCredentials::from_json(r#"{ "other": {} }"#).is_err());
    }
}
