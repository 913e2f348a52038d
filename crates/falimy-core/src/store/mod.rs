//! Local reactive store: the durable, observable replica

mod live;
mod query;
mod txn;
mod writes;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{watch, Mutex};

use crate::db::sync_meta::LAST_SYNCED_AT;
use crate::db::{
    Database, OutboxEntry, OutboxRepository, RecordRepository, SqliteRecordRepository,
    SqliteSyncMetaRepository, SyncMetaRepository,
};
use crate::models::{
    decode_model, decode_record, Collection, CollectionSet, LocalId, Model, Record, ServerId,
};
use crate::util::unix_millis_now;
use crate::{Error, Result};

pub use live::LiveQuery;
pub use query::{Filter, Query, SortOrder};
pub use txn::WriteTxn;
pub use writes::{GeofencePatch, ItemPatch, LocationFix, NewGeofence};

/// Notification published after every commit that changed data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Commit {
    /// Global revision, incremented once per data-changing commit
    pub revision: u64,
    /// Collections written by this commit
    pub collections: CollectionSet,
    /// Revision of the last commit that touched each collection
    touched_at: [u64; 6],
}

impl Commit {
    /// Latest revision at which any of `collections` changed
    pub fn stamp(&self, collections: CollectionSet) -> u64 {
        collections
            .iter()
            .map(|collection| self.touched_at[collection.position()])
            .max()
            .unwrap_or_default()
    }
}

struct StoreInner {
    db: Mutex<Database>,
    commits: watch::Sender<Commit>,
    db_path: Option<PathBuf>,
}

/// Thread-safe handle to the local replica.
///
/// Cheap to clone; all clones share one connection and one commit stream.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

impl LocalStore {
    fn from_database(db: Database, db_path: Option<PathBuf>) -> Self {
        let (commits, _) = watch::channel(Commit::default());
        Self {
            inner: Arc::new(StoreInner {
                db: Mutex::new(db),
                commits,
                db_path,
            }),
        }
    }

    /// Open the replica at the given filesystem path.
    ///
    /// The replica can always be rebuilt from the server, so a file that is
    /// not a database is moved aside and a fresh one created.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local replica at {} is unreadable: {}. Moving it aside and starting fresh.",
                    db_path.display(),
                    error
                );
                Self::quarantine_corrupted_db_file(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };
        Ok(Self::from_database(db, Some(db_path)))
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?, None))
    }

    fn is_corrupted_db_error(error: &Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_file(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = unix_millis_now();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "falimy.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));
            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local replica from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = db_path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(sidecar)?;
            }
        }
        Ok(())
    }

    /// Filesystem path of the replica, if on disk
    pub fn db_path(&self) -> Option<&Path> {
        self.inner.db_path.as_deref()
    }

    /// Run `mutator` in one transaction.
    ///
    /// Commits are serialized. Observers see either all of the mutator's
    /// writes or none of them; an `Err` from the mutator rolls back.
    pub async fn write<R>(&self, mutator: impl FnOnce(&mut WriteTxn<'_>) -> Result<R>) -> Result<R> {
        let mut db = self.inner.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        let mut txn = WriteTxn::new(tx, unix_millis_now());
        let result = mutator(&mut txn)?;
        let touched = txn.commit()?;

        if !touched.is_empty() {
            self.inner.commits.send_modify(|commit| {
                commit.revision += 1;
                commit.collections = touched;
                for collection in touched.iter() {
                    commit.touched_at[collection.position()] = commit.revision;
                }
            });
        }
        drop(db);
        Ok(result)
    }

    /// Global revision counter
    pub fn revision(&self) -> u64 {
        self.inner.commits.borrow().revision
    }

    /// Stream of commit notifications
    pub fn commits(&self) -> watch::Receiver<Commit> {
        self.inner.commits.subscribe()
    }

    /// Live row by local id
    pub async fn find<T: Model>(&self, local_id: &LocalId) -> Result<T> {
        let db = self.inner.db.lock().await;
        let record = SqliteRecordRepository::new(db.connection()).get(T::COLLECTION, local_id)?;
        drop(db);
        record
            .filter(|record| !record.meta().is_deleted)
            .ok_or_else(|| Error::not_found(T::COLLECTION.label(), local_id))?
            .into_model()
    }

    /// Live row by server id, through the identity index
    pub async fn find_by_server_id<T: Model>(&self, server_id: &ServerId) -> Result<T> {
        let db = self.inner.db.lock().await;
        let record =
            SqliteRecordRepository::new(db.connection()).get_by_server_id(T::COLLECTION, server_id)?;
        drop(db);
        record
            .filter(|record| !record.meta().is_deleted)
            .ok_or_else(|| Error::not_found(T::COLLECTION.label(), server_id))?
            .into_model()
    }

    /// Live query over a model type
    pub fn query<T: Model>(&self, query: Query) -> Result<LiveQuery<T>> {
        query.validate(T::COLLECTION)?;
        Ok(LiveQuery::new(
            self.clone(),
            T::COLLECTION,
            query,
            decode_model::<T>,
        ))
    }

    /// Live query over a collection named at runtime
    pub fn query_collection(&self, name: &str, query: Query) -> Result<LiveQuery<Record>> {
        let collection: Collection = name.parse()?;
        query.validate(collection)?;
        Ok(LiveQuery::new(self.clone(), collection, query, decode_record))
    }

    /// One-shot typed query
    pub async fn fetch<T: Model>(&self, query: &Query) -> Result<Vec<T>> {
        query.validate(T::COLLECTION)?;
        self.select(T::COLLECTION, query)
            .await?
            .into_iter()
            .map(|row| decode_model(T::COLLECTION, row))
            .collect()
    }

    /// Matching rows in their stored JSON form, from one consistent snapshot
    pub(crate) async fn select(&self, collection: Collection, query: &Query) -> Result<Vec<Value>> {
        let db = self.inner.db.lock().await;
        let rows = SqliteRecordRepository::new(db.connection()).scan(
            collection,
            query.index_key(collection),
            query.includes_deleted(),
        )?;
        drop(db);
        Ok(query.apply(rows))
    }

    /// Mutations not yet confirmed by the server
    pub async fn pending_mutations(&self) -> Result<Vec<OutboxEntry>> {
        let db = self.inner.db.lock().await;
        let entries = OutboxRepository::new(db.connection()).list()?;
        drop(db);
        Ok(entries)
    }

    /// Completion time of the last successful full sync (Unix ms)
    pub async fn last_synced_at(&self) -> Result<Option<i64>> {
        let db = self.inner.db.lock().await;
        let value = SqliteSyncMetaRepository::new(db.connection()).get_i64(LAST_SYNCED_AT)?;
        drop(db);
        Ok(value)
    }

    /// Physically remove soft-deleted rows that no pending mutation refers to
    pub async fn purge_tombstones(&self) -> Result<usize> {
        self.write(|txn| {
            let mut purged = 0;
            for collection in Collection::ALL {
                purged += txn.purge_deleted(collection)?;
            }
            Ok(purged)
        })
        .await
    }

    /// Apply the location retention policy and forget tombstones of the same age
    pub async fn purge_location_history(&self, older_than: Duration) -> Result<usize> {
        let age = i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX);
        self.write(|txn| {
            let cutoff = txn.now().saturating_sub(age);
            let pruned = txn.tombstones().prune(cutoff)?;
            if pruned > 0 {
                tracing::debug!("Pruned {pruned} tombstones");
            }
            txn.purge_location_before(cutoff)
        })
        .await
    }

    /// Wipe all replicated data, pending mutations and sync bookkeeping
    pub async fn clear(&self) -> Result<()> {
        self.write(|txn| txn.clear()).await?;
        tracing::info!("Cleared local replica");
        Ok(())
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("db_path", &self.inner.db_path)
            .field("revision", &self.revision())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{List, ListItem, ListType};
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn family() -> ServerId {
        ServerId::from("fam1")
    }

    #[tokio::test]
    async fn test_write_bumps_revision_and_notifies() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut commits = store.commits();
        assert_eq!(store.revision(), 0);

        store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();

        assert!(commits.has_changed().unwrap());
        let commit = *commits.borrow_and_update();
        assert_eq!(commit.revision, 1);
        assert!(commit.collections.contains(Collection::Lists));
        assert_eq!(store.revision(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_rolls_back() {
        let store = LocalStore::open_in_memory().unwrap();
        let list = List::new(family(), "Groceries", ListType::Shopping, None, 1);

        let result: Result<()> = store
            .write(|txn| {
                txn.insert(list.clone())?;
                Err(Error::InvalidInput("abort".to_string()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.revision(), 0);
        assert!(store.find::<List>(&list.meta.local_id).await.is_err());
        assert!(store.pending_mutations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_item_without_list_is_integrity_error() {
        let store = LocalStore::open_in_memory().unwrap();
        let item = ListItem::new(ServerId::from("nope"), "Milk", None, 1);

        let error = store.write(|txn| txn.insert(item)).await.unwrap_err();
        assert!(matches!(error, Error::ReferentialIntegrity(_)));
        assert!(error.is_local());
    }

    #[tokio::test]
    async fn test_find_by_server_id() {
        let store = LocalStore::open_in_memory().unwrap();
        let list = store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();

        let found: List = store.find_by_server_id(&list.meta.server_id).await.unwrap();
        assert_eq!(found.meta.local_id, list.meta.local_id);

        let missing = store
            .find_by_server_id::<List>(&ServerId::from("missing"))
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_query_collection_rejects_unknown_name() {
        let store = LocalStore::open_in_memory().unwrap();
        let error = store.query_collection("recipes", Query::new()).unwrap_err();
        assert!(matches!(error, Error::Schema(_)));
    }

    #[tokio::test]
    async fn test_clear_wipes_everything() {
        let store = LocalStore::open_in_memory().unwrap();
        store
            .create_list(&family(), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.fetch::<List>(&Query::new()).await.unwrap().is_empty());
        assert!(store.pending_mutations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_path_moves_corrupted_file_aside() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("falimy.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let store = LocalStore::open_path(&path).unwrap();
        assert_eq!(store.db_path(), Some(path.as_path()));

        let backups = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }
}
