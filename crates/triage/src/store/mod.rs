//! Result store and history persistence
//!
//! [`ResultStore`] keeps the classified feed ordered for display. The
//! [`HistoryBackend`] trait persists records and the sync cursor per
//! mailbox identity, so the feed and the dedup index survive restarts.

mod memory;
mod result_store;
mod sqlite;
mod traits;

pub use memory::InMemoryHistory;
pub use result_store::{ExportOptions, ExportRow, ResultStore, to_json};
pub use sqlite::SqliteHistory;
pub use traits::HistoryBackend;
