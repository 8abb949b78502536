//! Gmail REST mailbox source
//!
//! Lists the newest N message ids, fetches each one in `raw` format and
//! optionally removes the `UNREAD` label. Uses synchronous HTTP (ureq) to be
//! executor-agnostic.

use base64::prelude::*;
use log::{debug, warn};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use super::{ListFilter, MailboxSession, MailboxSource, SourceError};
use crate::credentials::{Credential, CredentialProvider};
use crate::models::ProviderId;

/// Gmail API base URL
const BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Attempts per request on transient failures
const MAX_ATTEMPTS: u32 = 3;

/// Response from listing messages
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    messages: Option<Vec<MessageRef>>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Message fetched with `format=raw`
#[derive(Debug, Deserialize)]
struct RawMessage {
    raw: Option<String>,
}

/// Gmail account to sync
pub struct GmailSource {
    credentials: Arc<dyn CredentialProvider>,
    listing_window: usize,
}

impl GmailSource {
    /// `listing_window` is how many of the newest messages each listing returns
    pub fn new(credentials: Arc<dyn CredentialProvider>, listing_window: usize) -> Self {
        Self {
            credentials,
            listing_window: listing_window.clamp(1, 500),
        }
    }
}

impl MailboxSource for GmailSource {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, SourceError> {
        let credential = self
            .credentials
            .credential()
            .map_err(|e| SourceError::Auth(format!("{:#}", e)))?;

        let access_token = match credential {
            Credential::Bearer { token, .. } => token,
            Credential::Password(_) => {
                return Err(SourceError::Auth(
                    "Gmail API requires an OAuth access token".to_string(),
                ));
            }
        };

        let session = GmailSession {
            access_token,
            listing_window: self.listing_window,
        };

        // Verifies the token before the cycle starts listing
        session.get::<serde_json::Value>(&format!("{}/users/me/profile", BASE_URL))?;

        Ok(Box::new(session))
    }

    fn describe(&self) -> String {
        "gmail://users/me".to_string()
    }
}

struct GmailSession {
    access_token: String,
    listing_window: usize,
}

impl GmailSession {
    fn get<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, SourceError> {
        with_retry(|| {
            let mut response = ureq::get(url)
                .header("Authorization", &format!("Bearer {}", self.access_token))
                .call()
                .map_err(map_http_error)?;

            response
                .body_mut()
                .read_json()
                .map_err(|e| SourceError::Protocol(format!("invalid response: {}", e)))
        })
    }

    fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<(), SourceError> {
        with_retry(|| {
            ureq::post(url)
                .header("Authorization", &format!("Bearer {}", self.access_token))
                .send_json(body)
                .map_err(map_http_error)?;
            Ok(())
        })
    }
}

impl MailboxSession for GmailSession {
    fn list_candidate_ids(&mut self, filter: ListFilter) -> Result<Vec<ProviderId>, SourceError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            BASE_URL, self.listing_window
        );
        if filter == ListFilter::Unseen {
            url.push_str(&format!("&q={}", urlencoding::encode("is:unread")));
        }

        let list: ListMessagesResponse = self.get(&url)?;
        let ids = list
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter_map(|message| {
                let id = ProviderId::from_hex(&message.id);
                if id.is_none() {
                    warn!("Skipping Gmail message with non-hex id {}", message.id);
                }
                id
            })
            .collect();

        Ok(ids)
    }

    fn fetch_raw(&mut self, id: &ProviderId) -> Result<Vec<u8>, SourceError> {
        let url = format!(
            "{}/users/me/messages/{}?format=raw",
            BASE_URL,
            id.as_str()
        );
        let message: RawMessage = self.get(&url).map_err(|e| match e {
            SourceError::NotFound(_) => SourceError::NotFound(id.to_string()),
            other => other,
        })?;
        let raw = message
            .raw
            .ok_or_else(|| SourceError::Protocol(format!("message {} has no raw payload", id)))?;

        decode_raw(&raw)
            .ok_or_else(|| SourceError::Protocol(format!("message {} has invalid base64", id)))
    }

    fn mark_consumed(&mut self, id: &ProviderId) -> Result<(), SourceError> {
        let url = format!("{}/users/me/messages/{}/modify", BASE_URL, id.as_str());
        self.post_json(&url, &serde_json::json!({ "removeLabelIds": ["UNREAD"] }))
    }

    fn close(&mut self) -> Result<(), SourceError> {
        debug!("Closing Gmail session");
        Ok(())
    }
}

/// Map HTTP failures onto source errors
fn map_http_error(error: ureq::Error) -> SourceError {
    match error {
        ureq::Error::StatusCode(401 | 403) => {
            SourceError::Auth("access token rejected".to_string())
        }
        ureq::Error::StatusCode(404) => SourceError::NotFound("resource".to_string()),
        ureq::Error::StatusCode(code) => SourceError::Protocol(format!("HTTP {}", code)),
        ureq::Error::Io(_)
        | ureq::Error::Timeout(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed => SourceError::Connect(error.to_string()),
        other => SourceError::Protocol(other.to_string()),
    }
}

/// Retry transient failures with exponential backoff
fn with_retry<T>(mut op: impl FnMut() -> Result<T, SourceError>) -> Result<T, SourceError> {
    let mut delay = Duration::from_millis(100);
    let mut attempt = 1;

    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e @ (SourceError::Connect(_) | SourceError::Protocol(_)))
                if attempt < MAX_ATTEMPTS =>
            {
                debug!("Gmail request failed (attempt {}): {}", attempt, e);
                let jitter = Duration::from_millis(rand_jitter());
                std::thread::sleep(delay + jitter);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}

/// Decode a `raw` payload
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_raw(data: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD];

    decoders.iter().find_map(|decoder| decoder.decode(data).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_raw_url_safe() {
        let raw = BASE64_URL_SAFE_NO_PAD.encode(b"Subject: hi\r\n\r\n??>>body");
        assert_eq!(decode_raw(&raw).unwrap(), b"Subject: hi\r\n\r\n??>>body");
    }

    #[test]
    fn test_decode_raw_padded() {
        let raw = base64::engine::general_purpose::URL_SAFE.encode(b"ab");
        assert!(raw.ends_with('='));
        assert_eq!(decode_raw(&raw).unwrap(), b"ab");
    }

    #[test]
    fn test_decode_raw_invalid() {
        assert!(decode_raw("!!not base64!!").is_none());
    }

    #[test]
    fn test_status_codes_map_to_source_errors() {
        assert!(matches!(
            map_http_error(ureq::Error::StatusCode(401)),
            SourceError::Auth(_)
        ));
        assert!(matches!(
            map_http_error(ureq::Error::StatusCode(403)),
            SourceError::Auth(_)
        ));
        assert!(matches!(
            map_http_error(ureq::Error::StatusCode(404)),
            SourceError::NotFound(_)
        ));
        assert!(matches!(
            map_http_error(ureq::Error::StatusCode(500)),
            SourceError::Protocol(_)
        ));
    }

    #[test]
    fn test_retry_gives_up_on_auth_errors() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(|| {
            calls += 1;
            Err(SourceError::Auth("nope".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_retry_recovers_from_transient_failure() {
        let mut calls = 0;
        let result = with_retry(|| {
            calls += 1;
            if calls < 2 {
                Err(SourceError::Connect("reset".to_string()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_listing_window_clamped() {
        let source = GmailSource::new(Arc::new(crate::credentials::StaticBearer::new("t")), 0);
        assert_eq!(source.listing_window, 1);
    }
}
