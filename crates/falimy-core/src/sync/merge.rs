//! Last-write-wins merge of remote state into the replica
//!
//! Shared by full sync and realtime so both paths resolve conflicts the same
//! way:
//!
//! * a tombstoned server id never comes back,
//! * the incoming record wins when `incoming.updated_at >= local.updated_at`
//!   (ties prefer the server), which also drops the local pending push,
//! * a remote delete always wins.

use crate::models::{Collection, Record, RowState, ServerId};
use crate::remote::{PushAction, PushEvent};
use crate::store::WriteTxn;
use crate::Result;

use super::codec;
use super::FamilyScope;

/// What merging one remote change did to the replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// Stale, identical or tombstoned; nothing written
    Ignored,
    Deleted,
    /// Belongs to another family; nothing written
    OutOfScope,
}

impl MergeOutcome {
    pub const fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Deleted)
    }
}

/// A decoded remote change, ready to be merged
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteChange {
    Upsert(Record),
    Delete {
        collection: Collection,
        server_id: ServerId,
        deleted_at: i64,
        /// The deleted record, when the payload was complete enough to decode
        record: Option<Record>,
    },
}

impl RemoteChange {
    /// Decode a push event. Fails with `InvalidRecord` for payloads that
    /// must be quarantined.
    pub fn from_event(event: &PushEvent, now: i64) -> Result<Self> {
        match event.action {
            PushAction::Create | PushAction::Update => Ok(Self::Upsert(codec::decode_record(
                event.collection,
                &event.record,
            )?)),
            PushAction::Delete => {
                let server_id = codec::server_id(&event.record).ok_or_else(|| {
                    crate::Error::InvalidRecord {
                        collection: event.collection.table(),
                        reason: "delete without id".to_string(),
                    }
                })?;
                Ok(Self::Delete {
                    collection: event.collection,
                    server_id,
                    deleted_at: codec::updated_at(&event.record).unwrap_or(now),
                    record: codec::decode_record(event.collection, &event.record).ok(),
                })
            }
        }
    }

    pub fn collection(&self) -> Collection {
        match self {
            Self::Upsert(record) => record.collection(),
            Self::Delete { collection, .. } => *collection,
        }
    }
}

/// Merge a remote record into the replica.
pub fn merge_remote(txn: &mut WriteTxn<'_>, mut incoming: Record) -> Result<MergeOutcome> {
    let collection = incoming.collection();
    let server_id = incoming.server_id().clone();

    if txn.tombstones().get(collection, &server_id)?.is_some() {
        tracing::debug!(
            "Ignoring {} {server_id}: deleted locally",
            collection.label()
        );
        return Ok(MergeOutcome::Ignored);
    }

    let Some(local) = txn.get_record(collection, &server_id)? else {
        txn.put_record(&incoming)?;
        return Ok(MergeOutcome::Inserted);
    };

    let local_meta = local.meta();
    if local_meta.is_deleted {
        return Ok(MergeOutcome::Ignored);
    }
    if incoming.meta().updated_at < local_meta.updated_at {
        tracing::debug!(
            "Ignoring stale {} {server_id} ({} < {})",
            collection.label(),
            incoming.meta().updated_at,
            local_meta.updated_at
        );
        return Ok(MergeOutcome::Ignored);
    }

    let local_id = local_meta.local_id;
    {
        let meta = incoming.meta_mut();
        meta.local_id = local_id;
        meta.sync_status = RowState::Synced;
        meta.is_deleted = false;
    }
    if incoming == local {
        return Ok(MergeOutcome::Ignored);
    }

    txn.outbox().remove(collection, &local_id)?;
    txn.put_record(&incoming)?;
    Ok(MergeOutcome::Updated)
}

/// Apply a remote delete. Always wins over local state.
pub fn apply_delete(
    txn: &mut WriteTxn<'_>,
    collection: Collection,
    server_id: &ServerId,
    deleted_at: i64,
) -> Result<MergeOutcome> {
    let now = txn.now();
    txn.tombstones().record(collection, server_id, deleted_at, now)?;
    if collection == Collection::Lists {
        let cascaded = txn.cascade_list_delete(server_id)?;
        if cascaded > 0 {
            tracing::debug!("Cascaded delete of list {server_id} to {cascaded} items");
        }
    }

    let Some(mut local) = txn.get_record(collection, server_id)? else {
        return Ok(MergeOutcome::Ignored);
    };
    let local_id = local.meta().local_id;
    txn.outbox().remove(collection, &local_id)?;
    if local.meta().is_deleted {
        return Ok(MergeOutcome::Ignored);
    }

    let meta = local.meta_mut();
    meta.is_deleted = true;
    meta.sync_status = RowState::Synced;
    meta.updated_at = meta.updated_at.max(deleted_at);
    txn.put_record(&local)?;
    Ok(MergeOutcome::Deleted)
}

/// Apply one decoded change, honoring the family scope.
pub fn apply_change(
    txn: &mut WriteTxn<'_>,
    scope: &FamilyScope,
    change: RemoteChange,
) -> Result<MergeOutcome> {
    match change {
        RemoteChange::Upsert(record) => {
            if !scope.admits(txn, &record)? {
                return Ok(MergeOutcome::OutOfScope);
            }
            merge_remote(txn, record)
        }
        RemoteChange::Delete {
            collection,
            server_id,
            deleted_at,
            record,
        } => {
            // A bare `{id}` delete still tombstones the id: the server only
            // sends us deletes for records we could read.
            let known = txn.get_record(collection, &server_id)?.is_some();
            if !known {
                if let Some(record) = &record {
                    if !scope.admits(txn, record)? {
                        return Ok(MergeOutcome::OutOfScope);
                    }
                }
            }
            apply_delete(txn, collection, &server_id, deleted_at)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{List, ListItem, ListType};
    use crate::store::{LocalStore, Query};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn family() -> ServerId {
        ServerId::from("fam1")
    }

    fn remote_list(id: &str, name: &str, updated: i64) -> Record {
        let payload = json!({
            "id": id,
            "family_id": "fam1",
            "name": name,
            "type": "shopping",
            "updated": updated,
        });
        let serde_json::Value::Object(payload) = payload else {
            unreachable!()
        };
        codec::decode_record(Collection::Lists, &payload).unwrap()
    }

    #[tokio::test]
    async fn newer_remote_wins_and_clears_pending_push() {
        let store = LocalStore::open_in_memory().unwrap();
        let list = store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();
        let sid = list.meta.server_id.clone();
        let newer = list.meta.updated_at + 10;

        let outcome = store
            .write(|txn| merge_remote(txn, remote_list(sid.as_str(), "Market", newer)))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Updated);

        let merged: List = store.find(&list.meta.local_id).await.unwrap();
        assert_eq!(merged.name, "Market");
        assert_eq!(merged.meta.sync_status, RowState::Synced);
        assert!(store.pending_mutations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn older_remote_is_ignored() {
        let store = LocalStore::open_in_memory().unwrap();
        let list = store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();
        let sid = list.meta.server_id.clone();
        let older = list.meta.updated_at - 10;

        let revision = store.revision();
        let outcome = store
            .write(|txn| merge_remote(txn, remote_list(sid.as_str(), "Stale", older)))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);
        assert_eq!(store.revision(), revision);
        assert_eq!(store.pending_mutations().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn merging_twice_is_idempotent() {
        let store = LocalStore::open_in_memory().unwrap();
        let first = store
            .write(|txn| merge_remote(txn, remote_list("l1", "Groceries", 100)))
            .await
            .unwrap();
        let revision = store.revision();
        let second = store
            .write(|txn| merge_remote(txn, remote_list("l1", "Groceries", 100)))
            .await
            .unwrap();

        assert_eq!(first, MergeOutcome::Inserted);
        assert_eq!(second, MergeOutcome::Ignored);
        assert_eq!(store.revision(), revision);
        assert_eq!(store.fetch::<List>(&Query::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_beats_pending_update_and_blocks_resurrection() {
        let store = LocalStore::open_in_memory().unwrap();
        let list = store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();
        let item = store
            .add_item(&list.meta.local_id, "Milk", None, None, None)
            .await
            .unwrap();
        let sid = list.meta.server_id.clone();

        let outcome = store
            .write(|txn| apply_delete(txn, Collection::Lists, &sid, 1))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Deleted);
        assert!(store.pending_mutations().await.unwrap().is_empty());
        assert!(store.find::<ListItem>(&item.meta.local_id).await.is_err());

        let resurrect = store
            .write(|txn| merge_remote(txn, remote_list(sid.as_str(), "Back", i64::MAX)))
            .await
            .unwrap();
        assert_eq!(resurrect, MergeOutcome::Ignored);
        assert!(store.find::<List>(&list.meta.local_id).await.is_err());
    }

    #[tokio::test]
    async fn out_of_family_records_are_discarded() {
        let store = LocalStore::open_in_memory().unwrap();
        let scope = FamilyScope::new(family());
        let mut foreign = remote_list("l9", "Theirs", 1);
        if let Record::List(list) = &mut foreign {
            list.family_id = ServerId::from("other");
        }

        let outcome = store
            .write(|txn| apply_change(txn, &scope, RemoteChange::Upsert(foreign)))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::OutOfScope);

        let mut foreign_delete = remote_list("l8", "Theirs", 2);
        if let Record::List(list) = &mut foreign_delete {
            list.family_id = ServerId::from("other");
        }
        let unknown_delete = RemoteChange::Delete {
            collection: Collection::Lists,
            server_id: ServerId::from("l8"),
            deleted_at: 2,
            record: Some(foreign_delete),
        };
        let outcome = store
            .write(|txn| apply_change(txn, &scope, unknown_delete))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::OutOfScope);
        assert_eq!(store.revision(), 0);
    }

    #[tokio::test]
    async fn bare_delete_of_unknown_row_blocks_later_create() {
        let store = LocalStore::open_in_memory().unwrap();
        let scope = FamilyScope::new(family());
        let delete = PushEvent::parse(
            None,
            r#"{"action":"delete","collection":"lists","record":{"id":"l1","updated":200}}"#,
        )
        .unwrap();
        let change = RemoteChange::from_event(&delete, 1).unwrap();

        let outcome = store
            .write(|txn| apply_change(txn, &scope, change))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);

        let stale = RemoteChange::Upsert(remote_list("l1", "Groceries", 100));
        let outcome = store
            .write(|txn| apply_change(txn, &scope, stale))
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Ignored);
        assert!(store.fetch::<List>(&Query::new()).await.unwrap().is_empty());
    }

    #[test]
    fn malformed_event_is_invalid_record() {
        let event = PushEvent::parse(
            None,
            r#"{"action":"update","collection":"lists","record":{"name":"x"}}"#,
        )
        .unwrap();
        let error = RemoteChange::from_event(&event, 1).unwrap_err();
        assert!(matches!(error, crate::Error::InvalidRecord { .. }));

        let delete = PushEvent::parse(
            None,
            r#"{"action":"delete","collection":"lists","record":{"id":"l1"}}"#,
        )
        .unwrap();
        let change = RemoteChange::from_event(&delete, 7).unwrap();
        assert_eq!(change.collection(), Collection::Lists);
        assert!(matches!(
            change,
            RemoteChange::Delete {
                deleted_at: 7,
                record: None,
                ..
            }
        ));
    }
}
