//! Replication metadata shared by every entity

use serde::{Deserialize, Serialize};

use super::{LocalId, ServerId};

/// Whether a row's latest state has been confirmed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowState {
    /// Matches the last server state we saw
    #[default]
    Synced,
    /// Has local mutations waiting in the outbox
    Pending,
}

impl RowState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Pending => "pending",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "pending" {
            Self::Pending
        } else {
            Self::Synced
        }
    }
}

/// Identity and bookkeeping fields carried by every replicated row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMeta {
    /// Local storage key
    pub local_id: LocalId,
    /// Identifier shared with the server and every other device
    pub server_id: ServerId,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms); drives last-write-wins
    pub updated_at: i64,
    /// Soft delete flag
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub sync_status: RowState,
}

impl RecordMeta {
    /// Metadata for an optimistic local create.
    #[must_use]
    pub fn pending(now: i64) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id: ServerId::generate(),
            created_at: now,
            updated_at: now,
            is_deleted: false,
            sync_status: RowState::Pending,
        }
    }

    /// Metadata for a row received from the server.
    #[must_use]
    pub fn synced(server_id: ServerId, created_at: i64, updated_at: i64) -> Self {
        Self {
            local_id: LocalId::new(),
            server_id,
            created_at,
            updated_at,
            is_deleted: false,
            sync_status: RowState::Synced,
        }
    }

    /// Stamp a local mutation. The new timestamp is strictly greater than the
    /// previous one so a local edit always beats the state it was based on.
    pub fn touch(&mut self, now: i64) {
        self.updated_at = now.max(self.updated_at + 1);
        self.sync_status = RowState::Pending;
    }

    pub const fn is_pending(&self) -> bool {
        matches!(self.sync_status, RowState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_is_monotonic() {
        let mut meta = RecordMeta::synced(ServerId::from("abc"), 1_000, 5_000);
        meta.touch(4_000);
        assert_eq!(meta.updated_at, 5_001);
        assert!(meta.is_pending());

        meta.touch(9_000);
        assert_eq!(meta.updated_at, 9_000);
    }

    #[test]
    fn pending_meta_has_generated_server_id() {
        let meta = RecordMeta::pending(42);
        assert_eq!(meta.server_id.as_str().len(), 15);
        assert_eq!(meta.created_at, 42);
        assert_eq!(meta.sync_status, RowState::Pending);
    }
}
