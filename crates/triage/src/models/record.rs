//! Provider ids and classified records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;

use super::{ClassificationResult, Priority};
use crate::decode::DecodedMessage;

/// Number of characters of classification text kept in `ClassifiedRecord::content`
pub const CONTENT_PREVIEW_CHARS: usize = 500;

/// Provider-assigned message identifier
///
/// Keeps the raw id exactly as the provider issued it (needed to fetch the
/// message again) together with its numeric sequence value, which drives the
/// high-water-mark cursor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId {
    raw: String,
    seq: u64,
}

impl ProviderId {
    pub fn new(raw: impl Into<String>, seq: u64) -> Self {
        Self {
            raw: raw.into(),
            seq,
        }
    }

    /// An IMAP UID: the raw id and sequence are the same number
    pub fn from_uid(uid: u32) -> Self {
        Self::new(uid.to_string(), u64::from(uid))
    }

    /// A hex-encoded id such as a Gmail message id
    pub fn from_hex(raw: &str) -> Option<Self> {
        let seq = u64::from_str_radix(raw, 16).ok()?;
        Some(Self::new(raw, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl Ord for ProviderId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.raw.cmp(&other.raw))
    }
}

impl PartialOrd for ProviderId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A message after classification, as shown in the feed and persisted
///
/// Records are immutable once created; only their position in the store
/// changes as newer records arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRecord {
    /// When the record was created
    pub time: DateTime<Utc>,
    pub priority: Priority,
    pub confidence: f64,
    /// Normalized sender
    pub sender: String,
    /// Normalized subject
    pub subject: String,
    /// Structural tokens (attachment markers)
    pub tokens: Vec<String>,
    /// Classification text, truncated to `CONTENT_PREVIEW_CHARS`
    pub content: String,
    /// Full plain-text body, if the message had one
    pub content_full: Option<String>,
    /// HTML body, if the message had one
    pub content_html: Option<String>,
    /// Raw provider message id
    pub id: String,
}

impl ClassifiedRecord {
    /// Build a record from a decoded message and its classification
    pub fn from_decoded(
        id: &ProviderId,
        message: &DecodedMessage,
        result: ClassificationResult,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            time,
            priority: result.priority,
            confidence: result.confidence,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            tokens: message.token_strings(),
            content: message.body.chars().take(CONTENT_PREVIEW_CHARS).collect(),
            content_full: message.body_text.clone(),
            content_html: message.body_html.clone(),
            id: id.as_str().to_string(),
        }
    }

    /// Feed ordering key: priority rank ascending, then newest first
    pub fn sort_key(&self) -> (u8, Reverse<DateTime<Utc>>) {
        (self.priority.rank(), Reverse(self.time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_from_uid() {
        let id = ProviderId::from_uid(4021);
        assert_eq!(id.as_str(), "4021");
        assert_eq!(id.seq(), 4021);
    }

    #[test]
    fn test_provider_id_from_hex() {
        let id = ProviderId::from_hex("18c2f0a1b2c3d4e5").unwrap();
        assert_eq!(id.as_str(), "18c2f0a1b2c3d4e5");
        assert_eq!(id.seq(), 0x18c2f0a1b2c3d4e5);

        assert!(ProviderId::from_hex("not-hex").is_none());
        assert!(ProviderId::from_hex("").is_none());
    }

    #[test]
    fn test_provider_id_orders_by_sequence() {
        let mut ids = vec![
            ProviderId::from_uid(10),
            ProviderId::from_uid(2),
            ProviderId::from_uid(33),
        ];
        ids.sort();
        let seqs: Vec<u64> = ids.iter().map(|id| id.seq()).collect();
        assert_eq!(seqs, vec![2, 10, 33]);
    }

    #[test]
    fn test_sort_key_prefers_priority_then_recency() {
        let now = Utc::now();
        let make = |priority, age_secs| ClassifiedRecord {
            time: now - chrono::Duration::seconds(age_secs),
            priority,
            confidence: 0.5,
            sender: String::new(),
            subject: String::new(),
            tokens: Vec::new(),
            content: String::new(),
            content_full: None,
            content_html: None,
            id: String::new(),
        };

        assert!(make(Priority::High, 100).sort_key() < make(Priority::Medium, 0).sort_key());
        assert!(make(Priority::Low, 0).sort_key() < make(Priority::Low, 100).sort_key());
    }
}
