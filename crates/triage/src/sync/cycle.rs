//! One sync cycle
//!
//! Connect, list candidates, pick the new ones with the cursor, then for
//! each selected message, newest first:
//! skip known id, fetch, decode, fingerprint dedup, classify, insert.
//! The cursor is committed once at the end with what actually completed.

use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;

use super::task::StopSignal;
use crate::classify::Classifier;
use crate::decode::decode;
use crate::models::{ClassifiedRecord, Priority, ProviderId};
use crate::service::{InsertOutcome, TriageService};
use crate::source::{ListFilter, MailboxSession, MailboxSource, SourceError};

/// Where a cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    Idle,
    Connecting,
    Listing,
    Filtering,
    /// 1-based position within the selection
    Processing {
        index: usize,
        total: usize,
    },
    Sleeping,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CyclePhase::Idle => f.write_str("Idle"),
            CyclePhase::Connecting => f.write_str("Connecting"),
            CyclePhase::Listing => f.write_str("Listing"),
            CyclePhase::Filtering => f.write_str("Filtering"),
            CyclePhase::Processing { index, total } => {
                write!(f, "Processing {}/{}", index, total)
            }
            CyclePhase::Sleeping => f.write_str("Sleeping"),
        }
    }
}

/// Cycle settings
#[derive(Debug, Clone)]
pub struct CycleOptions {
    pub filter: ListFilter,
    /// Messages processed on the first sync of an identity
    pub backlog_limit: usize,
    /// Flag processed messages as seen at the provider
    pub mark_consumed: bool,
}

impl Default for CycleOptions {
    fn default() -> Self {
        Self {
            filter: ListFilter::Unseen,
            backlog_limit: 50,
            mark_consumed: false,
        }
    }
}

/// Why a single message did not produce a record
#[derive(Debug, Clone, PartialEq)]
pub enum MessageFailure {
    /// Fetch failed; the id is retried on a later cycle
    Fetch(SourceError),
    /// Payload could not be parsed; the message is skipped for good
    Decode(String),
}

/// What happened to one selected message
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Added(Priority),
    Duplicate,
    Failed(MessageFailure),
}

impl MessageOutcome {
    /// Terminal outcomes are not retried
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageOutcome::Failed(MessageFailure::Fetch(_)))
    }
}

/// Cycle-level failure; the cursor is left unchanged
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Connect(SourceError),

    #[error(transparent)]
    Auth(SourceError),

    #[error("listing failed: {0}")]
    List(SourceError),

    #[error("a sync cycle is already running")]
    AlreadyRunning,
}

impl CycleError {
    fn from_connect(error: SourceError) -> Self {
        match error {
            SourceError::Auth(_) => CycleError::Auth(error),
            other => CycleError::Connect(other),
        }
    }

    fn from_list(error: SourceError) -> Self {
        match error {
            SourceError::Auth(_) => CycleError::Auth(error),
            other => CycleError::List(other),
        }
    }
}

/// Statistics from one cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Candidates returned by the listing
    pub listed: usize,
    /// Candidates picked by the cursor
    pub selected: usize,
    /// Whether this was the first sync of the identity
    pub bootstrap: bool,
    /// Candidates permanently skipped by the bootstrap backlog limit
    pub skipped_backlog: usize,
    pub added: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// A stop signal arrived before every selected message was processed
    pub interrupted: bool,
    pub cursor_before: u64,
    pub cursor_after: u64,
    /// Per-message outcomes in processing order
    pub outcomes: Vec<(ProviderId, MessageOutcome)>,
    /// Duration of the cycle
    pub duration_ms: u64,
}

impl CycleReport {
    /// Status line for display
    pub fn status_message(&self) -> String {
        let mut message = if self.listed == 0 {
            "No new messages".to_string()
        } else if self.added > 0 {
            format!("Added {} new messages", self.added)
        } else {
            "Up to date".to_string()
        };

        if self.failed > 0 {
            message.push_str(&format!(" ({} failed)", self.failed));
        }
        if self.interrupted {
            message.push_str(" (stopped)");
        }
        message
    }

    fn record(&mut self, id: &ProviderId, outcome: MessageOutcome) {
        match &outcome {
            MessageOutcome::Added(_) => self.added += 1,
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push((id.clone(), outcome));
    }
}

/// Run one sync cycle for the service's identity
///
/// Rejects the call with `AlreadyRunning` if another cycle holds the
/// service. Per-message failures never abort the cycle; connect, auth and
/// listing failures do, and leave the cursor untouched.
pub fn run_cycle(
    source: &dyn MailboxSource,
    classifier: &dyn Classifier,
    service: &TriageService,
    options: &CycleOptions,
    stop: &StopSignal,
) -> Result<CycleReport, CycleError> {
    let Some(_guard) = service.try_begin_cycle() else {
        return Err(CycleError::AlreadyRunning);
    };

    let start = Instant::now();
    let result = connect_and_process(source, classifier, service, options, stop);
    service.set_phase(CyclePhase::Idle);

    match result {
        Ok(mut report) => {
            report.duration_ms = start.elapsed().as_millis() as u64;
            info!(
                "[{}] cycle done: listed={} selected={} added={} duplicates={} failed={} cursor {}->{} ({}ms)",
                service.identity(),
                report.listed,
                report.selected,
                report.added,
                report.duplicates,
                report.failed,
                report.cursor_before,
                report.cursor_after,
                report.duration_ms
            );
            service.set_message(report.status_message());
            Ok(report)
        }
        Err(e) => {
            warn!("[{}] cycle failed: {}", service.identity(), e);
            service.set_error(e.to_string());
            Err(e)
        }
    }
}

fn connect_and_process(
    source: &dyn MailboxSource,
    classifier: &dyn Classifier,
    service: &TriageService,
    options: &CycleOptions,
    stop: &StopSignal,
) -> Result<CycleReport, CycleError> {
    service.set_phase(CyclePhase::Connecting);
    debug!("Connecting to {}", source.describe());
    let mut session = source.connect().map_err(CycleError::from_connect)?;

    let result = process_session(session.as_mut(), classifier, service, options, stop);

    if let Err(e) = session.close() {
        warn!("Failed to close mailbox session: {}", e);
    }
    result
}

fn process_session(
    session: &mut dyn MailboxSession,
    classifier: &dyn Classifier,
    service: &TriageService,
    options: &CycleOptions,
    stop: &StopSignal,
) -> Result<CycleReport, CycleError> {
    service.set_phase(CyclePhase::Listing);
    let candidates = session
        .list_candidate_ids(options.filter)
        .map_err(CycleError::from_list)?;

    service.set_phase(CyclePhase::Filtering);
    let cursor = service.cursor();
    let mut report = CycleReport {
        listed: candidates.len(),
        cursor_before: cursor.highest_seen_id,
        cursor_after: cursor.highest_seen_id,
        ..Default::default()
    };

    if candidates.is_empty() {
        return Ok(report);
    }

    let selection = cursor.select(&candidates, options.backlog_limit);
    report.selected = selection.len();
    report.bootstrap = selection.bootstrap;
    report.skipped_backlog = selection.skipped_backlog;

    if selection.bootstrap {
        info!(
            "[{}] first sync: processing newest {} of {} messages",
            service.identity(),
            selection.len(),
            candidates.len()
        );
    }

    let total = selection.len();
    let mut completed = HashSet::new();
    let mut attempted_max: Option<u64> = None;

    for (index, id) in selection.to_process.iter().enumerate() {
        if stop.is_stopped() {
            info!(
                "[{}] stop requested, {} messages left for the next cycle",
                service.identity(),
                total - index
            );
            report.interrupted = true;
            break;
        }

        service.set_phase(CyclePhase::Processing {
            index: index + 1,
            total,
        });
        attempted_max = Some(attempted_max.map_or(id.seq(), |max| max.max(id.seq())));

        let outcome = process_message(session, classifier, service, options, id);
        if outcome.is_terminal() {
            completed.insert(id.seq());
        }
        report.record(id, outcome);
    }

    let cursor = service.commit_cursor(&selection, &completed, attempted_max);
    report.cursor_after = cursor.highest_seen_id;
    Ok(report)
}

fn process_message(
    session: &mut dyn MailboxSession,
    classifier: &dyn Classifier,
    service: &TriageService,
    options: &CycleOptions,
    id: &ProviderId,
) -> MessageOutcome {
    if service.has_provider_id(id) {
        debug!("Message {} already recorded", id);
        return MessageOutcome::Duplicate;
    }

    let raw = match session.fetch_raw(id) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to fetch message {}: {}", id, e);
            return MessageOutcome::Failed(MessageFailure::Fetch(e));
        }
    };

    let message = match decode(&raw) {
        Ok(message) => message,
        Err(e) => {
            warn!("Skipping undecodable message {}: {}", id, e);
            return MessageOutcome::Failed(MessageFailure::Decode(e.to_string()));
        }
    };

    let fingerprint = message.fingerprint();
    if service.check_duplicate(id, &fingerprint) {
        debug!("Message {} is a duplicate of an earlier message", id);
        return MessageOutcome::Duplicate;
    }

    let result = classifier.classify(&message.classifier_input());
    let record = ClassifiedRecord::from_decoded(id, &message, result, Utc::now());

    if service.insert_record(record, fingerprint) == InsertOutcome::Duplicate {
        return MessageOutcome::Duplicate;
    }

    if options.mark_consumed
        && let Err(e) = session.mark_consumed(id)
    {
        warn!("Failed to mark message {} as seen: {}", id, e);
    }

    MessageOutcome::Added(result.priority)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_messages() {
        let mut report = CycleReport::default();
        assert_eq!(report.status_message(), "No new messages");

        report.listed = 5;
        assert_eq!(report.status_message(), "Up to date");

        report.added = 3;
        assert_eq!(report.status_message(), "Added 3 new messages");

        report.failed = 1;
        report.interrupted = true;
        assert_eq!(
            report.status_message(),
            "Added 3 new messages (1 failed) (stopped)"
        );
    }

    #[test]
    fn test_outcome_terminality() {
        assert!(MessageOutcome::Added(Priority::Low).is_terminal());
        assert!(MessageOutcome::Duplicate.is_terminal());
        assert!(MessageOutcome::Failed(MessageFailure::Decode("bad".to_string())).is_terminal());
        assert!(
            !MessageOutcome::Failed(MessageFailure::Fetch(SourceError::Connect(
                "reset".to_string()
            )))
            .is_terminal()
        );
    }

    #[test]
    fn test_connect_errors_classified() {
        assert!(matches!(
            CycleError::from_connect(SourceError::Auth("denied".to_string())),
            CycleError::Auth(_)
        ));
        assert!(matches!(
            CycleError::from_connect(SourceError::Connect("refused".to_string())),
            CycleError::Connect(_)
        ));
        assert!(matches!(
            CycleError::from_list(SourceError::Protocol("BAD".to_string())),
            CycleError::List(_)
        ));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(
            CyclePhase::Processing { index: 2, total: 7 }.to_string(),
            "Processing 2/7"
        );
    }
}
