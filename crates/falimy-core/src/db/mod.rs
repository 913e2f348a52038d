//! Database layer for Falimy

mod connection;
mod migrations;
mod outbox;
mod repository;
pub mod sync_meta;
mod tombstones;

pub use connection::Database;
pub use outbox::{Coalesced, MutationKind, OutboxEntry, OutboxRepository};
pub use repository::{RecordRepository, SqliteRecordRepository};
pub use sync_meta::{SqliteSyncMetaRepository, SyncMetaRepository};
pub use tombstones::TombstoneRepository;
