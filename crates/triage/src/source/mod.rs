//! Mailbox sources
//!
//! A source knows how to open a session against one mailbox. Sessions are
//! opened once per sync cycle and closed at its end. Two concrete shapes:
//! - [`ImapSource`]: IMAP search/fetch/store over TLS
//! - [`GmailSource`]: Gmail REST API, listing the newest N messages
//!
//! [`InMemoryMailbox`] serves tests and dry runs.

mod gmail;
mod imap;
mod memory;

pub use self::gmail::GmailSource;
pub use self::imap::{DEFAULT_IMAP_PORT, ImapSource};
pub use self::memory::InMemoryMailbox;

use serde::{Deserialize, Serialize};

use crate::models::ProviderId;

/// Errors a mailbox source can report
///
/// An empty listing is not an error; these are distinct from "no messages".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("message {0} not found")]
    NotFound(String),
}

/// Which messages a listing should return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFilter {
    All,
    #[default]
    Unseen,
}

/// Connection factory for one mailbox
pub trait MailboxSource: Send + Sync {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, SourceError>;

    /// Short description for logs, e.g. "imap://imap.example.com/INBOX"
    fn describe(&self) -> String;
}

/// An open connection to a mailbox
pub trait MailboxSession: Send {
    /// Ids of candidate messages, in no particular order
    fn list_candidate_ids(&mut self, filter: ListFilter) -> Result<Vec<ProviderId>, SourceError>;

    /// Full raw RFC 5322 payload of one message
    fn fetch_raw(&mut self, id: &ProviderId) -> Result<Vec<u8>, SourceError>;

    /// Mark a processed message so it is not listed as unseen again
    fn mark_consumed(&mut self, _id: &ProviderId) -> Result<(), SourceError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError>;
}
