//! Sync bookkeeping key/value repository implementation

use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Unix ms of the last completed full sync
pub const LAST_SYNCED_AT: &str = "last_synced_at";
/// Store revision observed at the end of the last completed full sync
pub const LAST_SYNCED_REVISION: &str = "last_synced_revision";
/// Server id of the family the replica was filled for
pub const FAMILY_ID: &str = "family_id";

/// Trait for sync bookkeeping storage operations
pub trait SyncMetaRepository {
    /// Load a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Load a value as an integer, ignoring unparsable entries
    fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.get(key)?.and_then(|value| value.trim().parse().ok()))
    }
}

/// `SQLite` implementation of `SyncMetaRepository`
pub struct SqliteSyncMetaRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncMetaRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl SyncMetaRepository for SqliteSyncMetaRepository<'_> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM sync_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }
}
