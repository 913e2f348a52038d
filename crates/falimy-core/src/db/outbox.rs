//! Outbox of local mutations waiting to be pushed

use crate::error::Result;
use crate::models::{Collection, LocalId, ServerId};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::str::FromStr;

/// Kind of pending mutation for one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "create" => Self::Create,
            "delete" => Self::Delete,
            _ => Self::Update,
        }
    }
}

/// One coalesced pending mutation. The payload is read from the row itself at
/// push time, so the entry only records what kind of request to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub seq: i64,
    pub collection: Collection,
    pub local_id: LocalId,
    pub server_id: ServerId,
    pub kind: MutationKind,
    pub queued_at: i64,
    pub attempts: i64,
    pub last_error: Option<String>,
}

/// What happened to the outbox when a mutation was recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coalesced {
    /// An entry of this kind is now queued
    Queued(MutationKind),
    /// A delete cancelled a create that never reached the server
    Cancelled,
}

/// `SQLite` access to the `outbox` table
pub struct OutboxRepository<'a> {
    conn: &'a Connection,
}

impl<'a> OutboxRepository<'a> {
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn parse_entry(row: &Row<'_>) -> rusqlite::Result<OutboxEntry> {
        let collection: String = row.get(1)?;
        let local_id: String = row.get(2)?;
        let server_id: String = row.get(3)?;
        let kind: String = row.get(4)?;

        let collection = Collection::from_str(&collection).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::other(error.to_string())),
            )
        })?;
        let local_id = LocalId::from_str(&local_id).map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(error))
        })?;

        Ok(OutboxEntry {
            seq: row.get(0)?,
            collection,
            local_id,
            server_id: ServerId::from(server_id.as_str()),
            kind: MutationKind::parse(&kind),
            queued_at: row.get(5)?,
            attempts: row.get(6)?,
            last_error: row.get(7)?,
        })
    }

    /// Pending entry for a row, if any
    pub fn get(&self, collection: Collection, local_id: &LocalId) -> Result<Option<OutboxEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT seq, collection, local_id, server_id, kind, queued_at, attempts, last_error
                 FROM outbox WHERE collection = ?1 AND local_id = ?2",
                params![collection.table(), local_id.as_str()],
                Self::parse_entry,
            )
            .optional()?;
        Ok(entry)
    }

    /// Record a mutation, folding it into any entry already queued for the row.
    ///
    /// create + update stays a create; anything + delete becomes a delete,
    /// except that deleting a row whose create is still queued cancels both.
    pub fn record(
        &self,
        collection: Collection,
        local_id: &LocalId,
        server_id: &ServerId,
        kind: MutationKind,
        now: i64,
    ) -> Result<Coalesced> {
        let existing = self.get(collection, local_id)?.map(|entry| entry.kind);

        let next = match (existing, kind) {
            (Some(MutationKind::Create), MutationKind::Delete) => {
                self.remove(collection, local_id)?;
                return Ok(Coalesced::Cancelled);
            }
            (Some(MutationKind::Create), _) => MutationKind::Create,
            (Some(MutationKind::Delete), _) | (_, MutationKind::Delete) => MutationKind::Delete,
            (Some(MutationKind::Update), _) | (None, MutationKind::Update) => MutationKind::Update,
            (None, MutationKind::Create) => MutationKind::Create,
        };

        self.conn.execute(
            "INSERT INTO outbox (collection, local_id, server_id, kind, queued_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(collection, local_id) DO UPDATE SET
                kind = excluded.kind,
                server_id = excluded.server_id",
            params![
                collection.table(),
                local_id.as_str(),
                server_id.as_str(),
                next.as_str(),
                now
            ],
        )?;
        Ok(Coalesced::Queued(next))
    }

    /// Rewrite the kind of a queued entry
    pub fn set_kind(
        &self,
        collection: Collection,
        local_id: &LocalId,
        kind: MutationKind,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE outbox SET kind = ?3 WHERE collection = ?1 AND local_id = ?2",
            params![collection.table(), local_id.as_str(), kind.as_str()],
        )?;
        Ok(())
    }

    /// Remember a failed push attempt
    pub fn mark_failed(&self, seq: i64, error: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE outbox SET attempts = attempts + 1, last_error = ?2 WHERE seq = ?1",
            params![seq, error],
        )?;
        Ok(())
    }

    pub fn remove(&self, collection: Collection, local_id: &LocalId) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM outbox WHERE collection = ?1 AND local_id = ?2",
            params![collection.table(), local_id.as_str()],
        )?;
        Ok(rows > 0)
    }

    /// All queued entries in the order they were first recorded
    pub fn list(&self) -> Result<Vec<OutboxEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, collection, local_id, server_id, kind, queued_at, attempts, last_error
             FROM outbox ORDER BY seq",
        )?;
        let entries = stmt
            .query_map([], Self::parse_entry)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}
