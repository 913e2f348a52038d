//! Record repository implementation

use crate::error::Result;
use crate::models::{Collection, LocalId, Record, ServerId};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::Value;

/// Trait for replicated row storage operations
pub trait RecordRepository {
    /// Get a row by local id, including soft-deleted rows
    fn get(&self, collection: Collection, local_id: &LocalId) -> Result<Option<Record>>;

    /// Resolve a row through the identity index, including soft-deleted rows
    fn get_by_server_id(
        &self,
        collection: Collection,
        server_id: &ServerId,
    ) -> Result<Option<Record>>;

    /// Insert or replace a row keyed by its local id
    fn upsert(&self, record: &Record) -> Result<()>;

    /// Physically remove a row
    fn remove(&self, collection: Collection, local_id: &LocalId) -> Result<bool>;

    /// Stored JSON of a collection's rows, optionally narrowed by the
    /// collection's natural key.
    ///
    /// Without `include_deleted`, soft-deleted rows are skipped and list items
    /// are only returned while their parent list is live.
    fn scan(
        &self,
        collection: Collection,
        index_key: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<Value>>;

    /// Physically delete soft-deleted rows that no pending mutation refers to
    fn purge_deleted(&self, collection: Collection) -> Result<usize>;

    /// Delete location points recorded before `cutoff` (Unix ms)
    fn purge_location_before(&self, cutoff: i64) -> Result<usize>;

    /// Wipe all entity data and replication bookkeeping
    fn clear(&self) -> Result<()>;
}

/// `SQLite` implementation of `RecordRepository`
pub struct SqliteRecordRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecordRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_row(collection: Collection, data: &str) -> Result<Record> {
        let value: Value = serde_json::from_str(data)?;
        Record::from_value(collection, value)
    }

    fn upsert_sql(collection: Collection) -> String {
        let table = collection.table();
        let mut columns = vec!["local_id", "server_id"];
        if let Some(index) = collection.index_field() {
            columns.push(index);
        }
        if collection == Collection::LocationHistory {
            columns.push("timestamp");
        }
        columns.extend([
            "created_at",
            "updated_at",
            "is_deleted",
            "sync_status",
            "data",
        ]);

        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        let updates = columns
            .iter()
            .skip(1)
            .map(|column| format!("{column} = excluded.{column}"))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders})
             ON CONFLICT(local_id) DO UPDATE SET {updates}",
            columns.join(", ")
        )
    }
}

impl RecordRepository for SqliteRecordRepository<'_> {
    fn get(&self, collection: Collection, local_id: &LocalId) -> Result<Option<Record>> {
        let data: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT data FROM {} WHERE local_id = ?1", collection.table()),
                params![local_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| Self::parse_row(collection, &data))
            .transpose()
    }

    fn get_by_server_id(
        &self,
        collection: Collection,
        server_id: &ServerId,
    ) -> Result<Option<Record>> {
        let data: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT data FROM {} WHERE server_id = ?1", collection.table()),
                params![server_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.map(|data| Self::parse_row(collection, &data))
            .transpose()
    }

    fn upsert(&self, record: &Record) -> Result<()> {
        let collection = record.collection();
        let meta = record.meta();

        let mut values = vec![
            SqlValue::Text(meta.local_id.as_str()),
            SqlValue::Text(meta.server_id.to_string()),
        ];
        if collection.index_field().is_some() {
            values.push(
                record
                    .index_key()
                    .map_or(SqlValue::Null, |key| SqlValue::Text(key.to_string())),
            );
        }
        if let Some(timestamp) = record.timestamp() {
            values.push(SqlValue::Integer(timestamp));
        }
        values.extend([
            SqlValue::Integer(meta.created_at),
            SqlValue::Integer(meta.updated_at),
            SqlValue::Integer(i64::from(meta.is_deleted)),
            SqlValue::Text(meta.sync_status.as_str().to_string()),
            SqlValue::Text(serde_json::to_string(&record.to_value()?)?),
        ]);

        self.conn
            .execute(&Self::upsert_sql(collection), params_from_iter(values))?;
        Ok(())
    }

    fn remove(&self, collection: Collection, local_id: &LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            &format!("DELETE FROM {} WHERE local_id = ?1", collection.table()),
            params![local_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    fn scan(
        &self,
        collection: Collection,
        index_key: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<Value>> {
        let table = collection.table();
        let mut sql = format!("SELECT data FROM {table} WHERE 1 = 1");
        let mut values = Vec::new();

        if let (Some(column), Some(key)) = (collection.index_field(), index_key) {
            sql.push_str(&format!(" AND {column} = ?1"));
            values.push(SqlValue::Text(key.to_string()));
        }
        if !include_deleted {
            sql.push_str(" AND is_deleted = 0");
            if collection == Collection::ListItems {
                sql.push_str(
                    " AND EXISTS (SELECT 1 FROM lists
                       WHERE lists.server_id = list_items.list_id AND lists.is_deleted = 0)",
                );
            }
        }
        sql.push_str(" ORDER BY created_at, local_id");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values), |row| row.get::<_, String>(0))?;

        let mut out = Vec::new();
        for data in rows {
            out.push(serde_json::from_str(&data?)?);
        }
        Ok(out)
    }

    fn purge_deleted(&self, collection: Collection) -> Result<usize> {
        let table = collection.table();
        let purged = self.conn.execute(
            &format!(
                "DELETE FROM {table} WHERE is_deleted = 1 AND NOT EXISTS (
                    SELECT 1 FROM outbox
                    WHERE outbox.collection = ?1 AND outbox.local_id = {table}.local_id
                )"
            ),
            params![table],
        )?;
        Ok(purged)
    }

    fn purge_location_before(&self, cutoff: i64) -> Result<usize> {
        let purged = self.conn.execute(
            "DELETE FROM location_history WHERE timestamp < ?1",
            params![cutoff],
        )?;
        Ok(purged)
    }

    fn clear(&self) -> Result<()> {
        for collection in Collection::ALL {
            self.conn
                .execute(&format!("DELETE FROM {}", collection.table()), [])?;
        }
        self.conn.execute_batch(
            "DELETE FROM outbox;
             DELETE FROM tombstones;
             DELETE FROM sync_meta;",
        )?;
        Ok(())
    }
}
