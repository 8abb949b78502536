//! Triage crate - inbox priority monitoring
//!
//! This crate watches a mailbox and keeps a priority-sorted feed of new
//! messages:
//! - Mailbox sources (IMAP, Gmail REST) behind one session trait
//! - MIME decoding into sender, subject, body and structural tokens
//! - Fingerprint deduplication and a high-water-mark sync cursor
//! - Pluggable classifiers mapping text to a priority tier
//! - Per-identity result store with SQLite persistence
//! - Sync cycle driver with once and repeating schedules
//!
//! This crate has no UI dependencies; presentation reads
//! [`TriageService::snapshot`] and [`TriageService::status`].

pub mod classify;
pub mod config;
pub mod credentials;
pub mod cursor;
pub mod decode;
pub mod dedup;
pub mod identity;
pub mod models;
pub mod service;
pub mod source;
pub mod store;
pub mod sync;

pub use classify::{Classifier, PredictedLabel, load_classifier};
pub use config::{ClassifierConfig, SourceConfig, TriageConfig};
pub use credentials::{Credential, CredentialProvider, GmailCredentials};
pub use cursor::{Selection, SyncCursor};
pub use decode::{DecodeError, DecodedMessage, decode};
pub use dedup::{Fingerprint, SignatureIndex};
pub use identity::MailboxIdentity;
pub use models::{ClassificationResult, ClassifiedRecord, Priority, ProviderId};
pub use service::{FeedSnapshot, SyncStatus, TriageService};
pub use source::{ListFilter, MailboxSession, MailboxSource, SourceError};
pub use store::{ExportOptions, ExportRow, HistoryBackend, InMemoryHistory, SqliteHistory};
pub use sync::{
    CycleError, CycleOptions, CyclePhase, CycleReport, FailurePolicy, MessageOutcome, Schedule,
    StopSignal, SyncTask, TaskEvent, TaskHandle, run_cycle,
};
