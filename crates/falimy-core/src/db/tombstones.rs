//! Deleted server ids, kept so stale events cannot resurrect a row

use crate::error::Result;
use crate::models::{Collection, ServerId};
use rusqlite::{params, Connection, OptionalExtension};

/// `SQLite` access to the `tombstones` table
pub struct TombstoneRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TombstoneRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Remember that `server_id` was deleted. Keeps the latest delete time.
    pub fn record(
        &self,
        collection: Collection,
        server_id: &ServerId,
        deleted_at: i64,
        now: i64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tombstones (collection, server_id, deleted_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(collection, server_id) DO UPDATE SET
                deleted_at = MAX(tombstones.deleted_at, excluded.deleted_at)",
            params![collection.table(), server_id.as_str(), deleted_at, now],
        )?;
        Ok(())
    }

    /// Delete time of a tombstoned server id
    pub fn get(&self, collection: Collection, server_id: &ServerId) -> Result<Option<i64>> {
        let deleted_at = self
            .conn
            .query_row(
                "SELECT deleted_at FROM tombstones WHERE collection = ?1 AND server_id = ?2",
                params![collection.table(), server_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(deleted_at)
    }

    /// Forget tombstones recorded before `cutoff` (Unix ms)
    pub fn prune(&self, cutoff: i64) -> Result<usize> {
        let pruned = self.conn.execute(
            "DELETE FROM tombstones WHERE recorded_at < ?1",
            params![cutoff],
        )?;
        Ok(pruned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn test_record_keeps_latest_delete_time() {
        let db = Database::open_in_memory().unwrap();
        let tombstones = TombstoneRepository::new(db.connection());
        let id = ServerId::from("gone");

        tombstones.record(Collection::Lists, &id, 500, 1).unwrap();
        tombstones.record(Collection::Lists, &id, 300, 2).unwrap();

        assert_eq!(tombstones.get(Collection::Lists, &id).unwrap(), Some(500));
        assert_eq!(tombstones.get(Collection::ListItems, &id).unwrap(), None);
    }

    #[test]
    fn test_prune_by_recorded_time() {
        let db = Database::open_in_memory().unwrap();
        let tombstones = TombstoneRepository::new(db.connection());

        tombstones
            .record(Collection::Lists, &ServerId::from("old"), 1, 100)
            .unwrap();
        tombstones
            .record(Collection::Lists, &ServerId::from("new"), 1, 900)
            .unwrap();

        assert_eq!(tombstones.prune(500).unwrap(), 1);
        assert!(tombstones
            .get(Collection::Lists, &ServerId::from("old"))
            .unwrap()
            .is_none());
    }
}
