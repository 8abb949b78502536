//! In-memory mailbox source
//!
//! Holds raw messages keyed by UID and can be told to fail connects or
//! individual fetches. Clones share the same mailbox, so a test can keep a
//! handle while the sync task owns another.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ListFilter, MailboxSession, MailboxSource, SourceError};
use crate::models::ProviderId;

#[derive(Debug, Default)]
struct StoredMessage {
    raw: Vec<u8>,
    seen: bool,
}

#[derive(Debug, Default)]
struct MailboxState {
    messages: BTreeMap<u32, StoredMessage>,
    connect_error: Option<SourceError>,
    failing_fetches: HashSet<u32>,
    fetch_log: Vec<u32>,
    open_sessions: usize,
    connections: usize,
}

/// Shared in-memory mailbox
#[derive(Debug, Clone, Default)]
pub struct InMemoryMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl InMemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Deliver an unseen message
    pub fn add_message(&self, uid: u32, raw: impl Into<Vec<u8>>) {
        self.lock().messages.insert(
            uid,
            StoredMessage {
                raw: raw.into(),
                seen: false,
            },
        );
    }

    /// Expunge a message
    pub fn remove_message(&self, uid: u32) {
        self.lock().messages.remove(&uid);
    }

    /// Make every subsequent connect fail with `error` (or succeed again with `None`)
    pub fn set_connect_error(&self, error: Option<SourceError>) {
        self.lock().connect_error = error;
    }

    /// Make fetches of `uid` fail until cleared
    pub fn fail_fetch(&self, uid: u32) {
        self.lock().failing_fetches.insert(uid);
    }

    pub fn clear_fetch_failures(&self) {
        self.lock().failing_fetches.clear();
    }

    /// UIDs fetched so far, in fetch order
    pub fn fetch_log(&self) -> Vec<u32> {
        self.lock().fetch_log.clone()
    }

    pub fn is_seen(&self, uid: u32) -> bool {
        self.lock().messages.get(&uid).is_some_and(|m| m.seen)
    }

    /// Sessions opened and not yet closed
    pub fn open_sessions(&self) -> usize {
        self.lock().open_sessions
    }

    /// Total successful connects
    pub fn connections(&self) -> usize {
        self.lock().connections
    }
}

impl MailboxSource for InMemoryMailbox {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, SourceError> {
        let mut state = self.lock();
        if let Some(error) = &state.connect_error {
            return Err(error.clone());
        }
        state.open_sessions += 1;
        state.connections += 1;

        Ok(Box::new(InMemorySession {
            mailbox: self.clone(),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "memory://inbox".to_string()
    }
}

struct InMemorySession {
    mailbox: InMemoryMailbox,
    closed: bool,
}

fn uid_of(id: &ProviderId) -> Result<u32, SourceError> {
    u32::try_from(id.seq()).map_err(|_| SourceError::NotFound(id.to_string()))
}

impl MailboxSession for InMemorySession {
    fn list_candidate_ids(&mut self, filter: ListFilter) -> Result<Vec<ProviderId>, SourceError> {
        let state = self.mailbox.lock();
        Ok(state
            .messages
            .iter()
            .filter(|(_, m)| filter == ListFilter::All || !m.seen)
            .map(|(uid, _)| ProviderId::from_uid(*uid))
            .collect())
    }

    fn fetch_raw(&mut self, id: &ProviderId) -> Result<Vec<u8>, SourceError> {
        let uid = uid_of(id)?;
        let mut state = self.mailbox.lock();
        state.fetch_log.push(uid);

        if state.failing_fetches.contains(&uid) {
            return Err(SourceError::Connect(format!("fetch of {} interrupted", uid)));
        }

        state
            .messages
            .get(&uid)
            .map(|m| m.raw.clone())
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    fn mark_consumed(&mut self, id: &ProviderId) -> Result<(), SourceError> {
        let uid = uid_of(id)?;
        let mut state = self.mailbox.lock();
        let message = state
            .messages
            .get_mut(&uid)
            .ok_or_else(|| SourceError::NotFound(id.to_string()))?;
        message.seen = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        if !self.closed {
            self.closed = true;
            let mut state = self.mailbox.lock();
            state.open_sessions = state.open_sessions.saturating_sub(1);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_respects_filter() {
        let mailbox = InMemoryMailbox::new();
        mailbox.add_message(1, "Subject: a\r\n\r\nx");
        mailbox.add_message(2, "Subject: b\r\n\r\ny");

        let mut session = mailbox.connect().unwrap();
        session.mark_consumed(&ProviderId::from_uid(1)).unwrap();

        let unseen = session.list_candidate_ids(ListFilter::Unseen).unwrap();
        assert_eq!(unseen, vec![ProviderId::from_uid(2)]);

        let all = session.list_candidate_ids(ListFilter::All).unwrap();
        assert_eq!(all.len(), 2);
        assert!(mailbox.is_seen(1));
    }

    #[test]
    fn test_connect_error_and_session_tracking() {
        let mailbox = InMemoryMailbox::new();
        mailbox.set_connect_error(Some(SourceError::Auth("bad password".to_string())));
        assert!(matches!(mailbox.connect(), Err(SourceError::Auth(_))));

        mailbox.set_connect_error(None);
        let mut session = mailbox.connect().unwrap();
        assert_eq!(mailbox.open_sessions(), 1);
        session.close().unwrap();
        session.close().unwrap();
        assert_eq!(mailbox.open_sessions(), 0);
    }

    #[test]
    fn test_fetch_failures() {
        let mailbox = InMemoryMailbox::new();
        mailbox.add_message(7, "Subject: x\r\n\r\nbody");
        mailbox.fail_fetch(7);

        let mut session = mailbox.connect().unwrap();
        let id = ProviderId::from_uid(7);
        assert!(matches!(session.fetch_raw(&id), Err(SourceError::Connect(_))));

        mailbox.clear_fetch_failures();
        assert!(session.fetch_raw(&id).is_ok());
        assert!(matches!(
            session.fetch_raw(&ProviderId::from_uid(8)),
            Err(SourceError::NotFound(_))
        ));
        assert_eq!(mailbox.fetch_log(), vec![7, 7, 8]);
    }
}
