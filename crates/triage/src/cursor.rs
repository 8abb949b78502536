//! High-water-mark cursor
//!
//! Decides which listed message ids are new for a mailbox identity.
//!
//! Bootstrap (no prior sync): the newest `backlog_limit` ids are processed and
//! everything older is skipped for good. After the slice has been processed
//! the watermark is set to the largest id in the slice, so the skipped
//! backlog is never revisited.
//!
//! Steady state: every listed id above the watermark is processed, newest
//! first, with no limit. Ids at or below the watermark that did not complete
//! (fetch failure, or a stop signal arrived first) are kept in `retry_ids`
//! and offered again while they are still listed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

use crate::models::ProviderId;

/// Persisted sync progress for one mailbox identity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Largest provider sequence id processed so far; never decreases
    pub highest_seen_id: u64,
    /// Ids at or below the watermark that still need processing
    #[serde(default)]
    pub retry_ids: BTreeSet<u64>,
    /// When the last cycle committed
    #[serde(default)]
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// The ids a cycle should process, newest first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub to_process: Vec<ProviderId>,
    /// Whether this is the first sync for the identity
    pub bootstrap: bool,
    /// Candidates dropped by the backlog limit on bootstrap
    pub skipped_backlog: usize,
    /// Sequence ids of every listed candidate
    listed: HashSet<u64>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.to_process.is_empty()
    }

    pub fn len(&self) -> usize {
        self.to_process.len()
    }
}

impl SyncCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// No cycle has committed progress yet
    pub fn is_initial(&self) -> bool {
        self.highest_seen_id == 0
    }

    /// Pick the candidates to process this cycle
    pub fn select(&self, candidates: &[ProviderId], backlog_limit: usize) -> Selection {
        let mut sorted: Vec<ProviderId> = candidates.to_vec();
        sorted.sort_by(|a, b| b.cmp(a));
        sorted.dedup_by_key(|id| id.seq());

        let listed: HashSet<u64> = sorted.iter().map(ProviderId::seq).collect();

        if self.is_initial() {
            let limit = backlog_limit.max(1);
            let skipped_backlog = sorted.len().saturating_sub(limit);
            sorted.truncate(limit);
            return Selection {
                to_process: sorted,
                bootstrap: true,
                skipped_backlog,
                listed,
            };
        }

        sorted.retain(|id| id.seq() > self.highest_seen_id || self.retry_ids.contains(&id.seq()));

        Selection {
            to_process: sorted,
            bootstrap: false,
            skipped_backlog: 0,
            listed,
        }
    }

    /// Record the outcome of processing a selection
    ///
    /// `completed` holds the ids that reached a terminal outcome (added,
    /// duplicate, or undecodable). `attempted_max` is the largest id the
    /// cycle got to, if any. Every selected id that did not complete goes
    /// to the retry set.
    pub fn commit(
        &mut self,
        selection: &Selection,
        completed: &HashSet<u64>,
        attempted_max: Option<u64>,
    ) {
        self.last_cycle_at = Some(Utc::now());

        // Retry ids that dropped out of the listing cannot be fetched again
        self.retry_ids.retain(|id| selection.listed.contains(id));

        let Some(attempted_max) = attempted_max else {
            return;
        };

        self.highest_seen_id = self.highest_seen_id.max(attempted_max);

        for id in &selection.to_process {
            if completed.contains(&id.seq()) {
                self.retry_ids.remove(&id.seq());
            } else if id.seq() <= self.highest_seen_id {
                self.retry_ids.insert(id.seq());
            }
        }
    }

    /// Human-readable progress for status displays
    pub fn describe(&self) -> String {
        if self.is_initial() {
            "Not synced yet".to_string()
        } else if self.retry_ids.is_empty() {
            format!("Tracking above id {}", self.highest_seen_id)
        } else {
            format!(
                "Tracking above id {} ({} pending retry)",
                self.highest_seen_id,
                self.retry_ids.len()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(range: impl IntoIterator<Item = u32>) -> Vec<ProviderId> {
        range.into_iter().map(ProviderId::from_uid).collect()
    }

    fn seqs(selection: &Selection) -> Vec<u64> {
        selection.to_process.iter().map(|id| id.seq()).collect()
    }

    fn complete_all(cursor: &mut SyncCursor, selection: &Selection) {
        let done: HashSet<u64> = selection.to_process.iter().map(|id| id.seq()).collect();
        let max = done.iter().copied().max();
        cursor.commit(selection, &done, max);
    }

    #[test]
    fn test_bootstrap_takes_newest_slice() {
        let cursor = SyncCursor::new();
        let selection = cursor.select(&ids(1..=100), 50);

        assert!(selection.bootstrap);
        assert_eq!(selection.len(), 50);
        assert_eq!(selection.skipped_backlog, 50);
        assert_eq!(seqs(&selection), (51..=100).rev().collect::<Vec<u64>>());
    }

    #[test]
    fn test_bootstrap_backlog_is_skipped_forever() {
        let mut cursor = SyncCursor::new();
        let selection = cursor.select(&ids(1..=100), 50);
        complete_all(&mut cursor, &selection);
        assert_eq!(cursor.highest_seen_id, 100);

        // Same listing again: nothing from the skipped half comes back
        let next = cursor.select(&ids(1..=100), 50);
        assert!(next.is_empty());
        assert!(!next.bootstrap);
    }

    #[test]
    fn test_steady_state_has_no_limit() {
        let mut cursor = SyncCursor {
            highest_seen_id: 10,
            ..Default::default()
        };
        let selection = cursor.select(&ids(1..=200), 5);
        assert_eq!(selection.len(), 190);
        assert_eq!(selection.to_process[0].seq(), 200);

        complete_all(&mut cursor, &selection);
        assert_eq!(cursor.highest_seen_id, 200);
    }

    #[test]
    fn test_cursor_never_decreases() {
        let mut cursor = SyncCursor::new();
        let first = cursor.select(&ids([40, 41, 42]), 10);
        complete_all(&mut cursor, &first);
        assert_eq!(cursor.highest_seen_id, 42);

        // A later listing with only smaller ids selects nothing
        let second = cursor.select(&ids([3, 7, 9]), 10);
        assert!(second.is_empty());
        cursor.commit(&second, &HashSet::new(), None);
        assert_eq!(cursor.highest_seen_id, 42);

        // Even a bogus commit cannot move it backwards
        cursor.commit(&second, &HashSet::new(), Some(5));
        assert_eq!(cursor.highest_seen_id, 42);
    }

    #[test]
    fn test_incomplete_ids_are_retried() {
        let mut cursor = SyncCursor {
            highest_seen_id: 10,
            ..Default::default()
        };
        let selection = cursor.select(&ids(11..=15), 50);

        // 15 and 14 finished, 13 failed to fetch, 12 and 11 were never reached
        let done: HashSet<u64> = [15, 14].into_iter().collect();
        cursor.commit(&selection, &done, Some(15));

        assert_eq!(cursor.highest_seen_id, 15);
        assert_eq!(
            cursor.retry_ids.iter().copied().collect::<Vec<_>>(),
            vec![11, 12, 13]
        );

        let retry = cursor.select(&ids(11..=16), 50);
        assert_eq!(seqs(&retry), vec![16, 13, 12, 11]);

        complete_all(&mut cursor, &retry);
        assert!(cursor.retry_ids.is_empty());
        assert_eq!(cursor.highest_seen_id, 16);
    }

    #[test]
    fn test_failed_newest_id_is_retried() {
        let mut cursor = SyncCursor {
            highest_seen_id: 10,
            ..Default::default()
        };
        let selection = cursor.select(&ids([11, 12]), 50);
        let done: HashSet<u64> = [11].into_iter().collect();
        cursor.commit(&selection, &done, Some(12));

        assert_eq!(cursor.highest_seen_id, 12);
        assert!(cursor.retry_ids.contains(&12));
        assert_eq!(seqs(&cursor.select(&ids([11, 12]), 50)), vec![12]);
    }

    #[test]
    fn test_retry_ids_pruned_when_unlisted() {
        let mut cursor = SyncCursor {
            highest_seen_id: 20,
            retry_ids: [17, 18].into_iter().collect(),
            last_cycle_at: None,
        };
        let selection = cursor.select(&ids([18, 21]), 50);
        cursor.commit(&selection, &HashSet::new(), None);
        assert_eq!(cursor.retry_ids.iter().copied().collect::<Vec<_>>(), vec![18]);
    }

    #[test]
    fn test_nothing_attempted_keeps_bootstrap_state() {
        let mut cursor = SyncCursor::new();
        let selection = cursor.select(&ids(1..=10), 5);
        cursor.commit(&selection, &HashSet::new(), None);
        assert!(cursor.is_initial());
        assert!(cursor.retry_ids.is_empty());
    }

    #[test]
    fn test_zero_backlog_limit_still_selects_newest() {
        let cursor = SyncCursor::new();
        let selection = cursor.select(&ids(1..=3), 0);
        assert_eq!(seqs(&selection), vec![3]);
    }

    #[test]
    fn test_duplicate_candidates_collapsed() {
        let cursor = SyncCursor::new();
        let selection = cursor.select(&ids([5, 5, 4]), 10);
        assert_eq!(seqs(&selection), vec![5, 4]);
    }

    #[test]
    fn test_serialization() {
        let mut cursor = SyncCursor::new();
        let selection = cursor.select(&ids(1..=3), 10);
        complete_all(&mut cursor, &selection);

        let json = serde_json::to_string(&cursor).unwrap();
        let restored: SyncCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, cursor);
    }
}
