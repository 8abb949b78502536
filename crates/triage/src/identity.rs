//! Mailbox identity keying
//!
//! Persisted state is keyed by a one-way hash of the account identifier so
//! that two accounts never share a cursor, store or dedup index, and the raw
//! address never appears in file names.

use sha2::{Digest, Sha256};
use std::fmt;

/// Stable key for one mailbox account
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MailboxIdentity {
    account: String,
    key: String,
}

impl MailboxIdentity {
    /// Derive the identity from an account identifier (usually an address)
    ///
    /// The account is trimmed and lowercased first, so `Alice@Example.com `
    /// and `alice@example.com` map to the same key.
    pub fn new(account: &str) -> Self {
        let normalized = account.trim().to_lowercase();
        let digest = Sha256::digest(normalized.as_bytes());
        let key = digest.iter().map(|b| format!("{:02x}", b)).collect();

        Self {
            account: normalized,
            key,
        }
    }

    /// Normalized account identifier
    pub fn account(&self) -> &str {
        &self.account
    }

    /// Hex SHA-256 of the normalized account
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for MailboxIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.account)
    }
}
