//! Dedup signature index
//!
//! A fingerprint is the normalized sender, the normalized subject and the
//! first 20 characters of the classification body, joined with `_`. It is
//! deliberately lossy: two different messages that agree on all three
//! collide, and the later one is treated as a re-delivery of the first.
//!
//! The index also remembers which provider ids already produced a record,
//! so a message that is listed again is skipped before it is fetched.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::decode::first_chars;
use crate::models::ClassifiedRecord;

/// Number of body characters that take part in a fingerprint
pub const FINGERPRINT_BODY_CHARS: usize = 20;

/// Content fingerprint of a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build a fingerprint from already-normalized fields
    pub fn new(sender: &str, subject: &str, body: &str) -> Self {
        Self(format!(
            "{}_{}_{}",
            sender,
            subject,
            first_chars(body, FINGERPRINT_BODY_CHARS)
        ))
    }

    /// Re-derive the fingerprint of a persisted record
    pub fn from_record(record: &ClassifiedRecord) -> Self {
        Self::new(&record.sender, &record.subject, &record.content)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Set of fingerprints and provider ids already turned into records
#[derive(Debug, Default, Clone)]
pub struct SignatureIndex {
    fingerprints: HashSet<Fingerprint>,
    provider_ids: HashSet<String>,
}

impl SignatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from persisted records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ClassifiedRecord>) -> Self {
        let mut index = Self::new();
        for record in records {
            index.record(Fingerprint::from_record(record));
            if !record.id.is_empty() {
                index.provider_ids.insert(record.id.clone());
            }
        }
        index
    }

    pub fn is_duplicate(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains(fingerprint)
    }

    pub fn record(&mut self, fingerprint: Fingerprint) {
        self.fingerprints.insert(fingerprint);
    }

    /// Whether a provider id already produced a record or was seen as a duplicate
    pub fn has_provider_id(&self, id: &str) -> bool {
        self.provider_ids.contains(id)
    }

    pub fn record_provider_id(&mut self, id: impl Into<String>) {
        self.provider_ids.insert(id.into());
    }

    pub fn fingerprints(&self) -> &HashSet<Fingerprint> {
        &self.fingerprints
    }

    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    pub fn clear(&mut self) {
        self.fingerprints.clear();
        self.provider_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Priority;
    use chrono::Utc;

    fn make_record(id: &str, sender: &str, subject: &str, content: &str) -> ClassifiedRecord {
        ClassifiedRecord {
            time: Utc::now(),
            priority: Priority::Low,
            confidence: 0.4,
            sender: sender.to_string(),
            subject: subject.to_string(),
            tokens: Vec::new(),
            content: content.to_string(),
            content_full: None,
            content_html: None,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_fingerprint_format() {
        let fp = Fingerprint::new("alice", "hello", "the quick brown fox jumps over");
        assert_eq!(fp.as_str(), "alice_hello_the quick brown fox ");
    }

    #[test]
    fn test_record_and_check() {
        let mut index = SignatureIndex::new();
        let fp = Fingerprint::new("a", "b", "c");
        assert!(!index.is_duplicate(&fp));
        index.record(fp.clone());
        assert!(index.is_duplicate(&fp));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_long_bodies_sharing_prefix_collide() {
        // Accepted approximation: only 20 body characters take part
        let first = Fingerprint::new("ops", "Alert", "Nightly backup report: host-a failed");
        let second = Fingerprint::new("ops", "Alert", "Nightly backup report: host-b ok");
        assert_eq!(first, second);

        let mut index = SignatureIndex::new();
        index.record(first);
        assert!(index.is_duplicate(&second));
    }

    #[test]
    fn test_from_records_restores_fingerprints_and_ids() {
        let records = vec![
            make_record("101", "alice", "Hi", "Body one"),
            make_record("102", "bob", "Yo", "Body two"),
        ];
        let index = SignatureIndex::from_records(&records);

        assert_eq!(index.len(), 2);
        assert!(index.is_duplicate(&Fingerprint::new("alice", "Hi", "Body one")));
        assert!(index.has_provider_id("101"));
        assert!(index.has_provider_id("102"));
        assert!(!index.has_provider_id("103"));
    }

    #[test]
    fn test_clear() {
        let records = vec![make_record("1", "a", "b", "c")];
        let mut index = SignatureIndex::from_records(&records);
        index.clear();
        assert!(index.is_empty());
        assert!(!index.has_provider_id("1"));
    }
}
