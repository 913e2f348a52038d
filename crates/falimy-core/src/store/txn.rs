//! Write transactions over the local replica

use rusqlite::Transaction;
use serde_json::Value;

use crate::db::{
    Coalesced, MutationKind, OutboxRepository, RecordRepository, SqliteRecordRepository,
    SqliteSyncMetaRepository, TombstoneRepository,
};
use crate::models::{Collection, CollectionSet, ListItem, LocalId, Model, Record, ServerId};
use crate::{Error, Result};

/// One atomic unit of work against the store.
///
/// Nothing done through a `WriteTxn` is visible to observers until the
/// mutator passed to [`LocalStore::write`](super::LocalStore::write) returns
/// `Ok`; an error rolls everything back.
pub struct WriteTxn<'c> {
    tx: Transaction<'c>,
    touched: CollectionSet,
    now: i64,
}

impl<'c> WriteTxn<'c> {
    pub(crate) const fn new(tx: Transaction<'c>, now: i64) -> Self {
        Self {
            tx,
            touched: CollectionSet::empty(),
            now,
        }
    }

    pub(crate) fn commit(self) -> Result<CollectionSet> {
        self.tx.commit()?;
        Ok(self.touched)
    }

    /// Wall clock at the start of the transaction (Unix ms)
    pub const fn now(&self) -> i64 {
        self.now
    }

    /// Collections modified so far
    pub const fn touched(&self) -> CollectionSet {
        self.touched
    }

    fn records(&self) -> SqliteRecordRepository<'_> {
        SqliteRecordRepository::new(&self.tx)
    }

    pub(crate) fn outbox(&self) -> OutboxRepository<'_> {
        OutboxRepository::new(&self.tx)
    }

    pub(crate) fn tombstones(&self) -> TombstoneRepository<'_> {
        TombstoneRepository::new(&self.tx)
    }

    pub(crate) fn sync_meta(&self) -> SqliteSyncMetaRepository<'_> {
        SqliteSyncMetaRepository::new(&self.tx)
    }

    /// Row by local id, soft-deleted rows included
    pub fn get<T: Model>(&self, local_id: &LocalId) -> Result<Option<T>> {
        self.records()
            .get(T::COLLECTION, local_id)?
            .map(Record::into_model)
            .transpose()
    }

    /// Row by server id, soft-deleted rows included
    pub fn get_by_server_id<T: Model>(&self, server_id: &ServerId) -> Result<Option<T>> {
        self.get_record(T::COLLECTION, server_id)?
            .map(Record::into_model)
            .transpose()
    }

    pub(crate) fn get_record(
        &self,
        collection: Collection,
        server_id: &ServerId,
    ) -> Result<Option<Record>> {
        self.records().get_by_server_id(collection, server_id)
    }

    pub(crate) fn get_record_by_local(
        &self,
        collection: Collection,
        local_id: &LocalId,
    ) -> Result<Option<Record>> {
        self.records().get(collection, local_id)
    }

    /// Live row by local id, or `NotFound`
    pub fn require<T: Model>(&self, local_id: &LocalId) -> Result<T> {
        self.get::<T>(local_id)?
            .filter(|row| !row.meta().is_deleted)
            .ok_or_else(|| Error::not_found(T::COLLECTION.label(), local_id))
    }

    /// Stored rows of a collection (see [`RecordRepository::scan`])
    pub fn scan(
        &self,
        collection: Collection,
        index_key: Option<&str>,
        include_deleted: bool,
    ) -> Result<Vec<Value>> {
        self.records().scan(collection, index_key, include_deleted)
    }

    /// Write a row as-is. No integrity checks and no outbox entry.
    pub(crate) fn put_record(&mut self, record: &Record) -> Result<()> {
        self.records().upsert(record)?;
        self.touched.insert(record.collection());
        Ok(())
    }

    pub(crate) fn remove_record(&mut self, collection: Collection, local_id: &LocalId) -> Result<()> {
        if self.records().remove(collection, local_id)? {
            self.touched.insert(collection);
        }
        Ok(())
    }

    /// Every referenced parent must exist locally and be live.
    fn check_parent(&self, record: &Record) -> Result<()> {
        if let Record::ListItem(item) = record {
            let parent = self.get_record(Collection::Lists, &item.list_id)?;
            if !parent.is_some_and(|list| !list.meta().is_deleted) {
                return Err(Error::ReferentialIntegrity(format!(
                    "list item {:?} references missing list {}",
                    item.name, item.list_id
                )));
            }
        }
        Ok(())
    }

    /// Insert an optimistic local create and queue its push.
    pub fn insert<T: Model>(&mut self, row: T) -> Result<T> {
        let record = row.into_record();
        if self.get_record(record.collection(), record.server_id())?.is_some() {
            return Err(Error::InvalidInput(format!(
                "{} {} already exists",
                record.collection().label(),
                record.server_id()
            )));
        }
        self.check_parent(&record)?;
        self.put_record(&record)?;

        let meta = record.meta();
        self.outbox().record(
            record.collection(),
            &meta.local_id,
            &meta.server_id,
            MutationKind::Create,
            self.now,
        )?;
        record.into_model()
    }

    /// Apply a local edit to a live row and queue its push.
    pub fn update<T: Model>(&mut self, local_id: &LocalId, edit: impl FnOnce(&mut T)) -> Result<T> {
        let mut row = self.require::<T>(local_id)?;
        edit(&mut row);
        row.meta_mut().touch(self.now);

        let record = row.into_record();
        self.check_parent(&record)?;
        self.put_record(&record)?;

        let meta = record.meta();
        self.outbox().record(
            record.collection(),
            &meta.local_id,
            &meta.server_id,
            MutationKind::Update,
            self.now,
        )?;
        record.into_model()
    }

    /// Delete a live row locally and queue the delete.
    ///
    /// The server id is tombstoned at once so no later event can bring the
    /// row back. A row whose create never reached the server is removed
    /// outright.
    pub fn delete(&mut self, collection: Collection, local_id: &LocalId) -> Result<()> {
        let mut record = self
            .get_record_by_local(collection, local_id)?
            .filter(|record| !record.meta().is_deleted)
            .ok_or_else(|| Error::not_found(collection.label(), local_id))?;
        let server_id = record.server_id().clone();

        if collection == Collection::Lists {
            self.cascade_list_delete(&server_id)?;
        }

        match self
            .outbox()
            .record(collection, local_id, &server_id, MutationKind::Delete, self.now)?
        {
            Coalesced::Cancelled => self.remove_record(collection, local_id),
            Coalesced::Queued(_) => {
                self.tombstones()
                    .record(collection, &server_id, self.now, self.now)?;
                let meta = record.meta_mut();
                meta.is_deleted = true;
                meta.touch(self.now);
                self.put_record(&record)
            }
        }
    }

    /// Soft-delete the items of a deleted list. The server removes them with
    /// the list, so their own pending pushes are dropped.
    pub(crate) fn cascade_list_delete(&mut self, list_id: &ServerId) -> Result<usize> {
        let rows = self.scan(Collection::ListItems, Some(list_id.as_str()), true)?;
        let mut cascaded = 0;
        for value in rows {
            let mut item: ListItem = serde_json::from_value(value)?;
            if item.meta.is_deleted {
                continue;
            }

            let pending = self
                .outbox()
                .get(Collection::ListItems, &item.meta.local_id)?
                .map(|entry| entry.kind);
            self.outbox()
                .remove(Collection::ListItems, &item.meta.local_id)?;

            if pending == Some(MutationKind::Create) {
                self.remove_record(Collection::ListItems, &item.meta.local_id)?;
            } else {
                self.tombstones().record(
                    Collection::ListItems,
                    &item.meta.server_id,
                    self.now,
                    self.now,
                )?;
                item.meta.is_deleted = true;
                self.put_record(&item.into_record())?;
            }
            cascaded += 1;
        }
        Ok(cascaded)
    }

    pub(crate) fn purge_deleted(&mut self, collection: Collection) -> Result<usize> {
        let purged = self.records().purge_deleted(collection)?;
        if purged > 0 {
            self.touched.insert(collection);
        }
        Ok(purged)
    }

    pub(crate) fn purge_location_before(&mut self, cutoff: i64) -> Result<usize> {
        let purged = self.records().purge_location_before(cutoff)?;
        if purged > 0 {
            self.touched.insert(Collection::LocationHistory);
        }
        Ok(purged)
    }

    pub(crate) fn clear(&mut self) -> Result<()> {
        self.records().clear()?;
        self.touched = CollectionSet::all();
        Ok(())
    }
}
