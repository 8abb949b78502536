//! History persistence trait

use anyhow::Result;

use crate::cursor::SyncCursor;
use crate::identity::MailboxIdentity;
use crate::models::ClassifiedRecord;

/// Durable storage for one or more mailbox identities
///
/// Every operation is scoped to an identity; two identities never see each
/// other's records or cursor.
pub trait HistoryBackend: Send + Sync {
    /// Load all records in stored order (empty if nothing was saved)
    fn load_records(&self, identity: &MailboxIdentity) -> Result<Vec<ClassifiedRecord>>;

    /// Replace the stored records with `records`
    fn save_records(&self, identity: &MailboxIdentity, records: &[ClassifiedRecord]) -> Result<()>;

    /// Load the sync cursor, `None` if the identity has never synced
    fn load_cursor(&self, identity: &MailboxIdentity) -> Result<Option<SyncCursor>>;

    /// Save the sync cursor (upsert)
    fn save_cursor(&self, identity: &MailboxIdentity, cursor: &SyncCursor) -> Result<()>;

    /// Delete everything stored for the identity
    fn clear(&self, identity: &MailboxIdentity) -> Result<()>;
}
