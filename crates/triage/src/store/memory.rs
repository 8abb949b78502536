//! In-memory history implementation
//!
//! Used for tests and for runs that should not touch the disk.

use anyhow::{Result, bail};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use super::traits::HistoryBackend;
use crate::cursor::SyncCursor;
use crate::identity::MailboxIdentity;
use crate::models::ClassifiedRecord;

/// In-memory implementation of HistoryBackend
///
/// Uses HashMaps keyed by identity and protected by RwLocks.
#[derive(Default)]
pub struct InMemoryHistory {
    records: RwLock<HashMap<String, Vec<ClassifiedRecord>>>,
    cursors: RwLock<HashMap<String, SyncCursor>>,
    fail_writes: AtomicBool,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every save fail, to exercise persistence error handling
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("history storage is read-only");
        }
        Ok(())
    }
}

impl HistoryBackend for InMemoryHistory {
    fn load_records(&self, identity: &MailboxIdentity) -> Result<Vec<ClassifiedRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(identity.key()).cloned().unwrap_or_default())
    }

    fn save_records(&self, identity: &MailboxIdentity, records: &[ClassifiedRecord]) -> Result<()> {
        self.check_writable()?;
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.key().to_string(), records.to_vec());
        Ok(())
    }

    fn load_cursor(&self, identity: &MailboxIdentity) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().unwrap_or_else(|e| e.into_inner());
        Ok(cursors.get(identity.key()).cloned())
    }

    fn save_cursor(&self, identity: &MailboxIdentity, cursor: &SyncCursor) -> Result<()> {
        self.check_writable()?;
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.key().to_string(), cursor.clone());
        Ok(())
    }

    fn clear(&self, identity: &MailboxIdentity) -> Result<()> {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identity.key());
        self.cursors
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(identity.key());
        Ok(())
    }
}
