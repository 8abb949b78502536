//! IMAP mailbox source
//!
//! Uses the blocking `imap` client. Messages are fetched with `BODY.PEEK[]`
//! so reading a message never sets `\Seen` on its own; marking is explicit
//! through [`MailboxSession::mark_consumed`].

use log::debug;
use std::sync::Arc;

use super::{ListFilter, MailboxSession, MailboxSource, SourceError};
use crate::credentials::{Credential, CredentialProvider};
use crate::models::ProviderId;

/// Default IMAPS port
pub const DEFAULT_IMAP_PORT: u16 = 993;

/// SASL XOAUTH2 initial response
struct XOAuth2 {
    user: String,
    access_token: String,
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _data: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

/// IMAP server and mailbox to sync
pub struct ImapSource {
    host: String,
    port: u16,
    username: String,
    mailbox: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl ImapSource {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        mailbox: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            mailbox: mailbox.into(),
            credentials,
        }
    }

    fn login(
        &self,
        client: imap::Client<imap::Connection>,
    ) -> Result<imap::Session<imap::Connection>, SourceError> {
        let credential = self
            .credentials
            .credential()
            .map_err(|e| SourceError::Auth(format!("{:#}", e)))?;

        match credential {
            Credential::Bearer { token, .. } => {
                let auth = XOAuth2 {
                    user: self.username.clone(),
                    access_token: token,
                };
                client
                    .authenticate("XOAUTH2", &auth)
                    .map_err(|(e, _)| SourceError::Auth(e.to_string()))
            }
            Credential::Password(password) => client
                .login(&self.username, &password)
                .map_err(|(e, _)| SourceError::Auth(e.to_string())),
        }
    }
}

impl MailboxSource for ImapSource {
    fn connect(&self) -> Result<Box<dyn MailboxSession>, SourceError> {
        debug!("Connecting to {}:{}", self.host, self.port);
        let client = imap::ClientBuilder::new(self.host.as_str(), self.port)
            .connect()
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        let mut session = self.login(client)?;
        session.select(&self.mailbox).map_err(protocol_error)?;

        Ok(Box::new(ImapSession { session }))
    }

    fn describe(&self) -> String {
        format!("imap://{}/{}", self.host, self.mailbox)
    }
}

struct ImapSession {
    session: imap::Session<imap::Connection>,
}

fn protocol_error(error: imap::Error) -> SourceError {
    SourceError::Protocol(error.to_string())
}

fn uid_of(id: &ProviderId) -> Result<u32, SourceError> {
    u32::try_from(id.seq()).map_err(|_| SourceError::NotFound(id.to_string()))
}

impl MailboxSession for ImapSession {
    fn list_candidate_ids(&mut self, filter: ListFilter) -> Result<Vec<ProviderId>, SourceError> {
        let query = match filter {
            ListFilter::All => "ALL",
            ListFilter::Unseen => "UNSEEN",
        };
        let uids = self.session.uid_search(query).map_err(protocol_error)?;
        Ok(uids.into_iter().map(ProviderId::from_uid).collect())
    }

    fn fetch_raw(&mut self, id: &ProviderId) -> Result<Vec<u8>, SourceError> {
        let uid = uid_of(id)?;
        let fetches = self
            .session
            .uid_fetch(uid.to_string(), "BODY.PEEK[]")
            .map_err(protocol_error)?;

        fetches
            .iter()
            .find_map(|fetch| fetch.body().map(|body| body.to_vec()))
            .ok_or_else(|| SourceError::NotFound(id.to_string()))
    }

    fn mark_consumed(&mut self, id: &ProviderId) -> Result<(), SourceError> {
        let uid = uid_of(id)?;
        self.session
            .uid_store(uid.to_string(), "+FLAGS (\\Seen)")
            .map_err(protocol_error)?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SourceError> {
        self.session.logout().map_err(protocol_error)
    }
}
