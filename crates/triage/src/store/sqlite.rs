//! SQLite-based history storage
//!
//! One database file per mailbox identity (`history_<key>.db`), so clearing
//! an identity is a file delete and identities can never share rows.
//! Full bodies are stored zstd-compressed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::debug;
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::HistoryBackend;
use crate::cursor::SyncCursor;
use crate::identity::MailboxIdentity;
use crate::models::{ClassifiedRecord, Priority};

/// zstd level 3 = good balance of speed vs compression
const ZSTD_LEVEL: i32 = 3;

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Classified records in feed order
            CREATE TABLE records (
                position INTEGER PRIMARY KEY,
                id TEXT NOT NULL,
                time TEXT NOT NULL,
                priority TEXT NOT NULL,
                confidence REAL NOT NULL,
                sender TEXT NOT NULL,
                subject TEXT NOT NULL,
                tokens TEXT NOT NULL,     -- JSON array
                content TEXT NOT NULL,
                content_full BLOB,        -- zstd compressed
                content_html BLOB         -- zstd compressed
            );

            CREATE INDEX idx_records_id ON records(id);

            -- Single-row sync cursor
            CREATE TABLE sync_cursor (
                singleton INTEGER PRIMARY KEY CHECK (singleton = 1),
                highest_seen_id INTEGER NOT NULL,
                last_cycle_at TEXT
            );
            "#,
        ),
        // Migration 2: Retry tracking for incomplete messages
        M::up(
            r#"
            ALTER TABLE sync_cursor ADD COLUMN retry_ids TEXT NOT NULL DEFAULT '[]';
            "#,
        ),
    ])
}

/// Open a history database and bring its schema up to date
fn open_database(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("Failed to open database at {:?}", path))?;

    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA temp_store = MEMORY;
        "#,
    )?;

    migrations()
        .to_latest(&mut conn)
        .context("Failed to run database migrations")?;

    Ok(conn)
}

fn compress(text: Option<&String>) -> Result<Option<Vec<u8>>> {
    text.map(|t| zstd::encode_all(t.as_bytes(), ZSTD_LEVEL))
        .transpose()
        .context("Failed to compress body")
}

fn decompress(data: Option<Vec<u8>>) -> Result<Option<String>> {
    data.map(|bytes| {
        zstd::decode_all(bytes.as_slice())
            .context("Failed to decompress body")
            .map(|raw| String::from_utf8_lossy(&raw).into_owned())
    })
    .transpose()
}

/// SQLite history with one database per identity
pub struct SqliteHistory {
    dir: PathBuf,
    connections: Mutex<HashMap<String, Connection>>,
}

impl SqliteHistory {
    /// Create a history rooted at `dir`; databases are created on first use
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create history directory: {}", dir.display()))?;

        Ok(Self {
            dir,
            connections: Mutex::new(HashMap::new()),
        })
    }

    /// Database path for an identity
    pub fn database_path(&self, identity: &MailboxIdentity) -> PathBuf {
        self.dir.join(format!("history_{}.db", identity.key()))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` against the identity's database, opening it if needed
    fn with_conn<T>(
        &self,
        identity: &MailboxIdentity,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut connections = self.lock();
        let conn = match connections.entry(identity.key().to_string()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                let path = self.database_path(identity);
                debug!("Opening history database {}", path.display());
                entry.insert(open_database(&path)?)
            }
        };
        f(conn)
    }
}

impl HistoryBackend for SqliteHistory {
    fn load_records(&self, identity: &MailboxIdentity) -> Result<Vec<ClassifiedRecord>> {
        self.with_conn(identity, |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, time, priority, confidence, sender, subject, tokens, content,
                        content_full, content_html
                 FROM records ORDER BY position ASC",
            )?;

            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<Vec<u8>>>(8)?,
                    row.get::<_, Option<Vec<u8>>>(9)?,
                ))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (id, time, priority, confidence, sender, subject, tokens, content, full, html) =
                    row?;

                let time = chrono::DateTime::parse_from_rfc3339(&time)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .with_context(|| format!("Invalid timestamp for record {}", id))?;
                let tokens: Vec<String> = serde_json::from_str(&tokens).unwrap_or_default();

                records.push(ClassifiedRecord {
                    time,
                    priority: Priority::from_label(&priority),
                    confidence,
                    sender,
                    subject,
                    tokens,
                    content,
                    content_full: decompress(full)?,
                    content_html: decompress(html)?,
                    id,
                });
            }

            Ok(records)
        })
    }

    fn save_records(&self, identity: &MailboxIdentity, records: &[ClassifiedRecord]) -> Result<()> {
        self.with_conn(identity, |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM records", [])?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO records
                     (position, id, time, priority, confidence, sender, subject, tokens, content,
                      content_full, content_html)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )?;

                for (position, record) in records.iter().enumerate() {
                    stmt.execute(params![
                        position as i64,
                        record.id,
                        record.time.to_rfc3339(),
                        record.priority.as_str(),
                        record.confidence,
                        record.sender,
                        record.subject,
                        serde_json::to_string(&record.tokens)?,
                        record.content,
                        compress(record.content_full.as_ref())?,
                        compress(record.content_html.as_ref())?,
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn load_cursor(&self, identity: &MailboxIdentity) -> Result<Option<SyncCursor>> {
        self.with_conn(identity, |conn| {
            let row: Option<(i64, Option<String>, String)> = conn
                .query_row(
                    "SELECT highest_seen_id, last_cycle_at, retry_ids
                     FROM sync_cursor WHERE singleton = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((highest_seen_id, last_cycle_at, retry_ids_json)) = row else {
                return Ok(None);
            };

            let last_cycle_at = last_cycle_at.and_then(|s| {
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .ok()
            });

            Ok(Some(SyncCursor {
                // Stored as i64; the cast round-trips every u64 bit pattern
                highest_seen_id: highest_seen_id as u64,
                retry_ids: serde_json::from_str(&retry_ids_json).unwrap_or_default(),
                last_cycle_at,
            }))
        })
    }

    fn save_cursor(&self, identity: &MailboxIdentity, cursor: &SyncCursor) -> Result<()> {
        self.with_conn(identity, |conn| {
            let retry_ids_json = serde_json::to_string(&cursor.retry_ids)?;
            conn.execute(
                "INSERT OR REPLACE INTO sync_cursor
                 (singleton, highest_seen_id, last_cycle_at, retry_ids)
                 VALUES (1, ?, ?, ?)",
                params![
                    cursor.highest_seen_id as i64,
                    cursor.last_cycle_at.map(|t| t.to_rfc3339()),
                    retry_ids_json,
                ],
            )?;
            Ok(())
        })
    }

    fn clear(&self, identity: &MailboxIdentity) -> Result<()> {
        // Close the connection before removing the files
        self.lock().remove(identity.key());

        let path = self.database_path(identity);
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", path.display(), suffix));
            if file.exists() {
                std::fs::remove_file(&file)
                    .with_context(|| format!("Failed to remove {}", file.display()))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    fn create_test_history() -> (SqliteHistory, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let history = SqliteHistory::new(dir.path().join("history")).unwrap();
        (history, dir)
    }

    fn make_record(id: &str, priority: Priority) -> ClassifiedRecord {
        ClassifiedRecord {
            time: Utc.with_ymd_and_hms(2024, 5, 4, 12, 30, 0).unwrap(),
            priority,
            confidence: 0.82,
            sender: "Carol carol@example.com".to_string(),
            subject: "Quarterly numbers".to_string(),
            tokens: vec!["PDF".to_string(), "IMG".to_string()],
            content: "Numbers attached".to_string(),
            content_full: Some("Numbers attached\n\nCarol".to_string()),
            content_html: None,
            id: id.to_string(),
        }
    }

    #[test]
    fn test_records_round_trip() {
        let (history, _dir) = create_test_history();
        let identity = MailboxIdentity::new("carol@example.com");
        let records = vec![
            make_record("2", Priority::High),
            make_record("1", Priority::Unknown),
        ];

        history.save_records(&identity, &records).unwrap();
        assert_eq!(history.load_records(&identity).unwrap(), records);
    }

    #[test]
    fn test_save_replaces_records() {
        let (history, _dir) = create_test_history();
        let identity = MailboxIdentity::new("carol@example.com");

        history
            .save_records(&identity, &[make_record("1", Priority::Low)])
            .unwrap();
        history
            .save_records(&identity, &[make_record("2", Priority::Medium)])
            .unwrap();

        let loaded = history.load_records(&identity).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "2");
    }

    #[test]
    fn test_cursor_round_trip() {
        let (history, _dir) = create_test_history();
        let identity = MailboxIdentity::new("carol@example.com");
        assert!(history.load_cursor(&identity).unwrap().is_none());

        let cursor = SyncCursor {
            highest_seen_id: 0x18c2f0a1b2c3d4e5,
            retry_ids: [3, 9].into_iter().collect(),
            last_cycle_at: Some(Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()),
        };
        history.save_cursor(&identity, &cursor).unwrap();
        assert_eq!(history.load_cursor(&identity).unwrap(), Some(cursor));
    }

    #[test]
    fn test_identities_use_separate_databases() {
        let (history, _dir) = create_test_history();
        let alice = MailboxIdentity::new("alice@example.com");
        let bob = MailboxIdentity::new("bob@example.com");

        history
            .save_records(&alice, &[make_record("1", Priority::High)])
            .unwrap();

        assert!(history.load_records(&bob).unwrap().is_empty());
        assert_ne!(history.database_path(&alice), history.database_path(&bob));
    }

    #[test]
    fn test_clear_deletes_database() {
        let (history, _dir) = create_test_history();
        let identity = MailboxIdentity::new("carol@example.com");
        history
            .save_records(&identity, &[make_record("1", Priority::High)])
            .unwrap();
        assert!(history.database_path(&identity).exists());

        history.clear(&identity).unwrap();
        assert!(!history.database_path(&identity).exists());
        assert!(history.load_records(&identity).unwrap().is_empty());
    }

    #[test]
    fn test_bodies_are_compressed() {
        let (history, _dir) = create_test_history();
        let identity = MailboxIdentity::new("carol@example.com");
        let mut record = make_record("1", Priority::High);
        record.content_full = Some("repeat ".repeat(2000));
        history.save_records(&identity, &[record]).unwrap();

        let stored_len: i64 = history
            .with_conn(&identity, |conn| {
                Ok(conn.query_row("SELECT length(content_full) FROM records", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert!(stored_len < 2000);
    }
}
