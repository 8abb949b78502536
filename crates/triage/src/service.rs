//! Per-identity triage state
//!
//! [`TriageService`] owns the result store, the dedup index and the sync
//! cursor for one mailbox identity. Every mutation (insert, cursor commit,
//! clear) happens under one mutex and is followed by publishing a fresh
//! [`FeedSnapshot`], so readers never observe a half-sorted store.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::cursor::{Selection, SyncCursor};
use crate::dedup::{Fingerprint, SignatureIndex};
use crate::identity::MailboxIdentity;
use crate::models::{ClassifiedRecord, Priority, ProviderId};
use crate::store::{ExportOptions, ExportRow, HistoryBackend, ResultStore};
use crate::sync::CyclePhase;

/// Immutable view of the feed for presentation
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// Records in display order
    pub records: Vec<ClassifiedRecord>,
    /// Record counts per tier, in display order
    pub counts: Vec<(Priority, usize)>,
    pub cursor: SyncCursor,
}

/// User-visible sync status
#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub phase: CyclePhase,
    pub message: String,
    /// Set when the last cycle failed
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            phase: CyclePhase::Idle,
            message: "Idle".to_string(),
            error: None,
            updated_at: Utc::now(),
        }
    }
}

/// Result of offering a record to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Added,
    Duplicate,
}

struct FeedState {
    store: ResultStore,
    index: SignatureIndex,
    cursor: SyncCursor,
}

/// Marks a cycle as running until dropped
pub struct CycleGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Triage state for one mailbox identity
pub struct TriageService {
    identity: MailboxIdentity,
    history: Arc<dyn HistoryBackend>,
    state: Mutex<FeedState>,
    snapshot: RwLock<Arc<FeedSnapshot>>,
    status: RwLock<SyncStatus>,
    running: AtomicBool,
}

impl TriageService {
    /// Open the service, restoring records, dedup index and cursor from history
    pub fn open(identity: MailboxIdentity, history: Arc<dyn HistoryBackend>) -> Result<Self> {
        let records = history
            .load_records(&identity)
            .with_context(|| format!("Failed to load history for {}", identity))?;
        let cursor = history
            .load_cursor(&identity)
            .with_context(|| format!("Failed to load sync cursor for {}", identity))?
            .unwrap_or_default();

        let index = SignatureIndex::from_records(&records);
        let store = ResultStore::from_records(records);
        info!(
            "Opened history for {}: {} records, {}",
            identity,
            store.len(),
            cursor.describe()
        );

        let state = FeedState {
            store,
            index,
            cursor,
        };
        let snapshot = Arc::new(build_snapshot(&state));

        Ok(Self {
            identity,
            history,
            state: Mutex::new(state),
            snapshot: RwLock::new(snapshot),
            status: RwLock::new(SyncStatus::default()),
            running: AtomicBool::new(false),
        })
    }

    pub fn identity(&self) -> &MailboxIdentity {
        &self.identity
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, state: &FeedState) {
        let snapshot = Arc::new(build_snapshot(state));
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }

    /// Current feed; cheap to call, never blocks on a running cycle
    pub fn snapshot(&self) -> Arc<FeedSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn cursor(&self) -> SyncCursor {
        self.lock().cursor.clone()
    }

    /// Whether a cycle currently holds the running flag
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claim the running flag; `None` if another cycle holds it
    pub fn try_begin_cycle(&self) -> Option<CycleGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard {
                running: &self.running,
            })
    }

    pub fn set_phase(&self, phase: CyclePhase) {
        debug!("[{}] phase: {}", self.identity, phase);
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.phase = phase;
        status.updated_at = Utc::now();
    }

    /// Record a finished cycle
    pub fn set_message(&self, message: impl Into<String>) {
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.message = message.into();
        status.error = None;
        status.updated_at = Utc::now();
    }

    /// Record a failed cycle
    pub fn set_error(&self, error: impl Into<String>) {
        let error = error.into();
        let mut status = self.status.write().unwrap_or_else(|e| e.into_inner());
        status.message = format!("Error: {}", error);
        status.error = Some(error);
        status.updated_at = Utc::now();
    }

    /// Whether a provider id already produced a record (or a duplicate)
    pub fn has_provider_id(&self, id: &ProviderId) -> bool {
        self.lock().index.has_provider_id(id.as_str())
    }

    /// Check a fingerprint; a duplicate's provider id is remembered so a
    /// re-listing skips it before fetching
    pub fn check_duplicate(&self, id: &ProviderId, fingerprint: &Fingerprint) -> bool {
        let mut state = self.lock();
        if state.index.is_duplicate(fingerprint) {
            state.index.record_provider_id(id.as_str());
            return true;
        }
        false
    }

    /// Insert a record, re-sort and persist as one locked update
    ///
    /// Persistence failures are logged and do not undo the in-memory insert.
    pub fn insert_record(&self, record: ClassifiedRecord, fingerprint: Fingerprint) -> InsertOutcome {
        let mut state = self.lock();
        if state.index.is_duplicate(&fingerprint) {
            state.index.record_provider_id(record.id.clone());
            return InsertOutcome::Duplicate;
        }

        state.index.record(fingerprint);
        state.index.record_provider_id(record.id.clone());
        state.store.insert(record);

        if let Err(e) = self.history.save_records(&self.identity, state.store.records()) {
            warn!("Failed to persist history for {}: {:#}", self.identity, e);
        }

        self.publish(&state);
        InsertOutcome::Added
    }

    /// Commit cursor progress for a processed selection and persist it
    pub fn commit_cursor(
        &self,
        selection: &Selection,
        completed: &HashSet<u64>,
        attempted_max: Option<u64>,
    ) -> SyncCursor {
        let mut state = self.lock();
        state.cursor.commit(selection, completed, attempted_max);

        if let Err(e) = self.history.save_cursor(&self.identity, &state.cursor) {
            warn!("Failed to persist sync cursor for {}: {:#}", self.identity, e);
        }

        self.publish(&state);
        state.cursor.clone()
    }

    /// Drop all records, the dedup index and the cursor, in memory and on disk
    ///
    /// The next cycle after a clear is a bootstrap again.
    pub fn clear_history(&self) -> Result<()> {
        // Hold the running flag so no cycle can start and commit a stale cursor
        let Some(_guard) = self.try_begin_cycle() else {
            bail!("Cannot clear history while a sync cycle is running");
        };

        let mut state = self.lock();
        self.history
            .clear(&self.identity)
            .with_context(|| format!("Failed to clear history for {}", self.identity))?;

        state.store.clear();
        state.index.clear();
        state.cursor = SyncCursor::new();
        self.publish(&state);
        drop(state);

        info!("Cleared history for {}", self.identity);
        self.set_message("History cleared");
        Ok(())
    }

    /// Flatten the current feed for export
    pub fn export(&self, options: &ExportOptions) -> Vec<ExportRow> {
        self.lock().store.export(options)
    }
}

fn build_snapshot(state: &FeedState) -> FeedSnapshot {
    FeedSnapshot {
        records: state.store.records().to_vec(),
        counts: state.store.counts(),
        cursor: state.cursor.clone(),
    }
}
