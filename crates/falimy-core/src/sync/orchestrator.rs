//! Full reconciliation: drain the outbox, then pull every collection

use std::time::Duration;

use tokio::sync::watch;

use super::codec::{decode_record, encode_record};
use super::merge::{apply_delete, merge_remote, MergeOutcome};
use super::{EpochToken, SyncContext};
use crate::db::sync_meta::{LAST_SYNCED_AT, LAST_SYNCED_REVISION};
use crate::db::{MutationKind, OutboxEntry, SyncMetaRepository};
use crate::models::{Collection, Record, RowState};
use crate::remote::RemoteRecord;
use crate::util::unix_millis_now;
use crate::{Error, Result};

/// Default retention of location history
pub const DEFAULT_LOCATION_RETENTION: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Broad class of a sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Network or server trouble; the next trigger retries
    Transport,
    /// The session token was rejected
    AuthExpired,
    /// The local replica failed
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
    /// When it happened (Unix ms)
    pub at: i64,
}

impl SyncFailure {
    fn from_error(error: &Error) -> Self {
        let kind = match error {
            Error::AuthExpired => FailureKind::AuthExpired,
            Error::Transport(_) | Error::Rejected { .. } => FailureKind::Transport,
            _ => FailureKind::Local,
        };
        Self {
            kind,
            message: error.to_string(),
            at: unix_millis_now(),
        }
    }
}

/// What one sync run did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pushed: usize,
    pub push_failed: usize,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub ignored: usize,
    pub quarantined: usize,
    pub out_of_scope: usize,
    pub purged: usize,
}

impl SyncReport {
    fn count(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted => self.inserted += 1,
            MergeOutcome::Updated => self.updated += 1,
            MergeOutcome::Deleted => self.deleted += 1,
            MergeOutcome::Ignored => self.ignored += 1,
            MergeOutcome::OutOfScope => self.out_of_scope += 1,
        }
    }
}

/// Observable sync status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub last_error: Option<SyncFailure>,
    /// Completion time of the last successful sync (Unix ms)
    pub last_synced_at: Option<i64>,
    /// Store revision right after the last successful sync
    pub last_revision: u64,
    pub last_report: Option<SyncReport>,
}

/// How pushing one outbox entry ended
enum Confirmation {
    Confirmed,
    /// The row was edited while the push was in flight; it stays queued
    ChangedInFlight,
    /// The row was deleted while its create was in flight
    Vanished,
    /// The session ended while the push was in flight
    Discarded,
}

/// Clears `is_syncing` if a sync run is dropped before finishing.
struct SyncingGuard<'a> {
    status: &'a watch::Sender<SyncStatus>,
    finished: bool,
}

impl SyncingGuard<'_> {
    fn finish(mut self, update: impl FnOnce(&mut SyncStatus)) {
        self.finished = true;
        self.status.send_modify(|status| {
            status.is_syncing = false;
            update(status);
        });
    }
}

impl Drop for SyncingGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.status.send_modify(|status| status.is_syncing = false);
        }
    }
}

/// Drives full reconciliation with the backend.
///
/// A run pushes pending local mutations, then fetches each collection's
/// family-scoped state in dependency order and merges it with the same
/// last-write-wins rule as realtime. Failures never escape
/// [`trigger_sync`](Self::trigger_sync); they are reported through
/// [`SyncStatus::last_error`].
pub struct SyncOrchestrator {
    ctx: SyncContext,
    status: watch::Sender<SyncStatus>,
    location_retention: Duration,
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        Self {
            ctx,
            status,
            location_retention: DEFAULT_LOCATION_RETENTION,
        }
    }

    #[must_use]
    pub const fn with_location_retention(mut self, retention: Duration) -> Self {
        self.location_retention = retention;
        self
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Whether the last successful sync is older than `max_age` (or missing)
    pub fn is_stale(&self, max_age: Duration) -> bool {
        let max_age = i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);
        self.status
            .borrow()
            .last_synced_at
            .map_or(true, |at| unix_millis_now().saturating_sub(at) > max_age)
    }

    /// Load the persisted time of the last successful sync.
    pub async fn restore_status(&self) -> Result<()> {
        let (synced_at, revision) = self
            .ctx
            .store
            .write(|txn| {
                let meta = txn.sync_meta();
                Ok((
                    meta.get_i64(LAST_SYNCED_AT)?,
                    meta.get_i64(LAST_SYNCED_REVISION)?,
                ))
            })
            .await?;
        self.status.send_modify(|status| {
            status.last_synced_at = synced_at;
            status.last_revision = revision.and_then(|rev| u64::try_from(rev).ok()).unwrap_or(0);
        });
        Ok(())
    }

    /// Run a full sync, or wait for the one already running.
    ///
    /// Never fails; the outcome is in the returned status.
    pub async fn trigger_sync(&self) -> SyncStatus {
        let mut claimed = false;
        self.status.send_if_modified(|status| {
            if status.is_syncing {
                return false;
            }
            status.is_syncing = true;
            claimed = true;
            true
        });
        if !claimed {
            tracing::debug!("Sync already running; waiting for it");
            let mut status = self.status.subscribe();
            let _ = status.wait_for(|status| !status.is_syncing).await;
            return self.status();
        }

        let guard = SyncingGuard {
            status: &self.status,
            finished: false,
        };
        let token = self.ctx.epoch.token();
        tracing::info!("Sync started");
        let result = self.run(&token).await;

        match result {
            Ok(Some(report)) => {
                let revision = self.ctx.store.revision();
                let now = unix_millis_now();
                if let Err(error) = self.persist_completion(now, revision).await {
                    tracing::warn!("Failed to record sync completion: {error}");
                }
                tracing::info!(
                    "Sync finished: pushed {}, fetched {}, inserted {}, updated {}, ignored {}, quarantined {}",
                    report.pushed,
                    report.fetched,
                    report.inserted,
                    report.updated,
                    report.ignored,
                    report.quarantined
                );
                guard.finish(|status| {
                    status.last_error = None;
                    status.last_synced_at = Some(now);
                    status.last_revision = revision;
                    status.last_report = Some(report);
                });
            }
            Ok(None) => {
                tracing::info!("Session changed during sync; discarded its results");
                guard.finish(|_| {});
            }
            Err(error) => {
                tracing::warn!("Sync failed: {error}");
                if matches!(error, Error::AuthExpired) {
                    self.ctx.auth.raise();
                }
                let failure = SyncFailure::from_error(&error);
                guard.finish(|status| status.last_error = Some(failure));
            }
        }
        self.status()
    }

    async fn persist_completion(&self, now: i64, revision: u64) -> Result<()> {
        self.ctx
            .store
            .write(|txn| {
                let meta = txn.sync_meta();
                meta.set(LAST_SYNCED_AT, &now.to_string())?;
                meta.set(LAST_SYNCED_REVISION, &revision.to_string())
            })
            .await
    }

    /// `Ok(None)` when the session epoch moved and results were discarded.
    async fn run(&self, token: &EpochToken) -> Result<Option<SyncReport>> {
        let mut report = SyncReport::default();
        if !self.push_outbox(token, &mut report).await? {
            return Ok(None);
        }

        for collection in Collection::ALL {
            if !self.pull(collection, token, &mut report).await? {
                return Ok(None);
            }
        }

        report.purged = self.ctx.store.purge_tombstones().await?;
        report.purged += self
            .ctx
            .store
            .purge_location_history(self.location_retention)
            .await?;
        Ok(token.is_current().then_some(report))
    }

    /// Fetch and merge one collection. `false` if the epoch moved.
    async fn pull(
        &self,
        collection: Collection,
        token: &EpochToken,
        report: &mut SyncReport,
    ) -> Result<bool> {
        let family_id = self.ctx.scope.family_id();
        let fetched = self.ctx.remote.fetch_all(collection, family_id).await?;
        if !token.is_current() {
            return Ok(false);
        }
        report.fetched += fetched.len();

        let mut records: Vec<Record> = Vec::with_capacity(fetched.len());
        for raw in &fetched {
            match decode_record(collection, raw) {
                Ok(record) => records.push(record),
                Err(error) => {
                    report.quarantined += 1;
                    tracing::warn!("Quarantined {} record: {error}", collection.remote_name());
                }
            }
        }
        records.sort_by_key(|record| record.meta().updated_at);

        let scope = self.ctx.scope.clone();
        let token = token.clone();
        let outcomes = self
            .ctx
            .store
            .write(move |txn| {
                if !token.is_current() {
                    return Ok(None);
                }
                let mut outcomes = Vec::with_capacity(records.len());
                for record in records {
                    if scope.admits(txn, &record)? {
                        outcomes.push(merge_remote(txn, record)?);
                    } else {
                        outcomes.push(MergeOutcome::OutOfScope);
                    }
                }
                Ok(Some(outcomes))
            })
            .await?;

        let Some(outcomes) = outcomes else {
            return Ok(false);
        };
        for outcome in outcomes {
            report.count(outcome);
        }
        Ok(true)
    }

    /// Drain the outbox in order. `false` if the epoch moved.
    async fn push_outbox(&self, token: &EpochToken, report: &mut SyncReport) -> Result<bool> {
        let entries = self.ctx.store.pending_mutations().await?;
        if !entries.is_empty() {
            tracing::debug!("Pushing {} pending mutations", entries.len());
        }

        for entry in entries {
            if !token.is_current() {
                return Ok(false);
            }
            match self.push_entry(&entry, token).await {
                Ok(()) => report.pushed += 1,
                Err(error) if error.is_retryable() || matches!(error, Error::AuthExpired) => {
                    self.mark_failed(&entry, &error).await?;
                    return Err(error);
                }
                Err(error) => {
                    report.push_failed += 1;
                    tracing::warn!(
                        "Push of {} {} rejected: {error}",
                        entry.collection.label(),
                        entry.server_id
                    );
                    self.mark_failed(&entry, &error).await?;
                }
            }
        }
        Ok(token.is_current())
    }

    async fn mark_failed(&self, entry: &OutboxEntry, error: &Error) -> Result<()> {
        let seq = entry.seq;
        let message = error.to_string();
        self.ctx
            .store
            .write(move |txn| txn.outbox().mark_failed(seq, &message))
            .await
    }

    async fn drop_entry(&self, entry: &OutboxEntry) -> Result<()> {
        let (collection, local_id) = (entry.collection, entry.local_id);
        self.ctx
            .store
            .write(move |txn| txn.outbox().remove(collection, &local_id).map(|_| ()))
            .await
    }

    async fn push_entry(&self, entry: &OutboxEntry, token: &EpochToken) -> Result<()> {
        let remote = &self.ctx.remote;
        let collection = entry.collection;

        if entry.kind == MutationKind::Delete {
            return match remote.delete_record(collection, &entry.server_id).await {
                Ok(()) => self.drop_entry(entry).await,
                Err(error) if error.is_remote_not_found() => self.drop_entry(entry).await,
                Err(error) => Err(error),
            };
        }

        let local_id = entry.local_id;
        let row = self
            .ctx
            .store
            .write(move |txn| txn.get_record_by_local(collection, &local_id))
            .await?;
        let Some(row) = row.filter(|row| !row.meta().is_deleted) else {
            return self.drop_entry(entry).await;
        };
        let pushed_at = row.meta().updated_at;
        let fields = encode_record(&row)?;

        let response = match entry.kind {
            MutationKind::Create => match remote.create_record(collection, fields.clone()).await {
                Err(Error::Rejected { status, message }) if status != 404 => {
                    // Typically a retried create that already reached the server
                    tracing::debug!(
                        "Create of {} {} rejected ({message}); retrying as update",
                        collection.label(),
                        entry.server_id
                    );
                    remote
                        .update_record(collection, &entry.server_id, fields)
                        .await
                        .map_err(|error| {
                            if error.is_remote_not_found() {
                                Error::Rejected { status, message }
                            } else {
                                error
                            }
                        })
                }
                other => other,
            },
            _ => remote.update_record(collection, &entry.server_id, fields).await,
        };

        match response {
            Ok(confirmed) => match self.confirm(entry, token, pushed_at, confirmed).await? {
                Confirmation::Confirmed
                | Confirmation::ChangedInFlight
                | Confirmation::Discarded => Ok(()),
                Confirmation::Vanished => {
                    match remote.delete_record(collection, &entry.server_id).await {
                        Err(error) if !error.is_remote_not_found() => Err(error),
                        _ => Ok(()),
                    }
                }
            },
            Err(error) if error.is_remote_not_found() && token.is_current() => {
                tracing::info!(
                    "{} {} no longer exists on the server; deleting locally",
                    collection.label(),
                    entry.server_id
                );
                let server_id = entry.server_id.clone();
                let token = token.clone();
                self.ctx
                    .store
                    .write(move |txn| {
                        if !token.is_current() {
                            return Ok(());
                        }
                        let now = txn.now();
                        apply_delete(txn, collection, &server_id, now).map(|_| ())
                    })
                    .await
            }
            Err(error) => Err(error),
        }
    }

    /// Fold the server's answer into the pushed row.
    async fn confirm(
        &self,
        entry: &OutboxEntry,
        token: &EpochToken,
        pushed_at: i64,
        confirmed: RemoteRecord,
    ) -> Result<Confirmation> {
        let collection = entry.collection;
        let local_id = entry.local_id;
        let kind = entry.kind;
        let confirmed = decode_record(collection, &confirmed).ok();
        let token = token.clone();

        self.ctx
            .store
            .write(move |txn| {
                // A cleared or switched replica says nothing about the server row
                if !token.is_current() {
                    return Ok(Confirmation::Discarded);
                }
                let Some(mut row) = txn.get_record_by_local(collection, &local_id)? else {
                    return Ok(if kind == MutationKind::Create {
                        Confirmation::Vanished
                    } else {
                        Confirmation::Confirmed
                    });
                };
                if row.meta().is_deleted || row.meta().updated_at != pushed_at {
                    if kind == MutationKind::Create {
                        txn.outbox()
                            .set_kind(collection, &local_id, MutationKind::Update)?;
                    }
                    return Ok(Confirmation::ChangedInFlight);
                }

                txn.outbox().remove(collection, &local_id)?;
                if let Some(mut server) = confirmed {
                    let meta = server.meta_mut();
                    meta.local_id = local_id;
                    meta.updated_at = meta.updated_at.max(pushed_at);
                    row = server;
                } else {
                    row.meta_mut().sync_status = RowState::Synced;
                }
                txn.put_record(&row)?;
                Ok(Confirmation::Confirmed)
            })
            .await
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("status", &*self.status.borrow())
            .field("location_retention", &self.location_retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{List, ListType, ServerId};
    use crate::remote::{MemoryRemote, PushChannel, RemoteClient};
    use crate::store::{LocalStore, Query};
    use crate::sync::{AuthExpiry, FamilyScope, SessionEpoch};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    /// Ends the session (as a logout would) right after the server accepts a create.
    struct LogoutDuringCreate {
        inner: MemoryRemote,
        epoch: SessionEpoch,
        store: LocalStore,
    }

    #[async_trait]
    impl RemoteClient for LogoutDuringCreate {
        async fn fetch_all(
            &self,
            collection: Collection,
            family_id: &ServerId,
        ) -> Result<Vec<RemoteRecord>> {
            self.inner.fetch_all(collection, family_id).await
        }

        async fn open_channel(
            &self,
            collections: &[Collection],
        ) -> Result<Box<dyn PushChannel>> {
            self.inner.open_channel(collections).await
        }

        async fn create_record(
            &self,
            collection: Collection,
            fields: RemoteRecord,
        ) -> Result<RemoteRecord> {
            let created = self.inner.create_record(collection, fields).await?;
            self.epoch.advance();
            self.store.clear().await?;
            Ok(created)
        }

        async fn update_record(
            &self,
            collection: Collection,
            id: &ServerId,
            fields: RemoteRecord,
        ) -> Result<RemoteRecord> {
            self.inner.update_record(collection, id, fields).await
        }

        async fn delete_record(&self, collection: Collection, id: &ServerId) -> Result<()> {
            self.inner.delete_record(collection, id).await
        }
    }

    fn orchestrator(remote: &MemoryRemote) -> (SyncOrchestrator, LocalStore) {
        let store = LocalStore::open_in_memory().unwrap();
        let ctx = SyncContext::new(
            store.clone(),
            Arc::new(remote.clone()),
            FamilyScope::new(ServerId::from("fam1")),
        );
        (SyncOrchestrator::new(ctx), store)
    }

    #[tokio::test]
    async fn pushes_local_create_and_confirms_it() {
        let remote = MemoryRemote::new();
        let (sync, store) = orchestrator(&remote);
        let list = store
            .create_list(&ServerId::from("fam1"), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();

        let status = sync.trigger_sync().await;
        assert_eq!(status.last_error, None);
        assert_eq!(status.last_report.unwrap().pushed, 1);

        let confirmed: List = store.find(&list.meta.local_id).await.unwrap();
        assert_eq!(confirmed.meta.sync_status, RowState::Synced);
        assert!(store.pending_mutations().await.unwrap().is_empty());
        assert!(remote
            .get(Collection::Lists, list.meta.server_id.as_str())
            .is_some());
    }

    #[tokio::test]
    async fn transport_failure_is_reported_not_returned() {
        let remote = MemoryRemote::new();
        remote.set_offline(true);
        let (sync, _store) = orchestrator(&remote);

        let status = sync.trigger_sync().await;
        assert!(!status.is_syncing);
        assert_eq!(status.last_error.unwrap().kind, FailureKind::Transport);
        assert!(sync.is_stale(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn auth_expiry_is_raised() {
        let remote = MemoryRemote::new();
        remote.set_auth_expired(true);
        let (sync, _store) = orchestrator(&remote);

        let status = sync.trigger_sync().await;
        assert_eq!(status.last_error.unwrap().kind, FailureKind::AuthExpired);
        assert!(sync.ctx.auth.is_raised());
    }

    #[tokio::test]
    async fn quarantines_malformed_records() {
        let remote = MemoryRemote::new();
        remote.seed(
            Collection::Lists,
            json!({"id": "l1", "family_id": "fam1", "name": "Ok", "type": "todo", "updated": 5}),
        );
        remote.seed(
            Collection::Lists,
            json!({"id": "l2", "family_id": "fam1", "name": "Bad", "type": "recipes", "updated": 6}),
        );
        let (sync, store) = orchestrator(&remote);

        let report = sync.trigger_sync().await.last_report.unwrap();
        assert_eq!(report.quarantined, 1);
        assert_eq!(report.inserted, 1);
        assert_eq!(store.fetch::<List>(&Query::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn remote_404_on_update_deletes_locally() {
        let remote = MemoryRemote::new();
        remote.seed(
            Collection::Lists,
            json!({"id": "l1", "family_id": "fam1", "name": "Old", "type": "todo", "updated": 5}),
        );
        let (sync, store) = orchestrator(&remote);
        sync.trigger_sync().await;

        let list: List = store
            .find_by_server_id(&ServerId::from("l1"))
            .await
            .unwrap();
        store.rename_list(&list.meta.local_id, "New").await.unwrap();
        remote
            .delete_record(Collection::Lists, &ServerId::from("l1"))
            .await
            .unwrap();

        let status = sync.trigger_sync().await;
        assert_eq!(status.last_error, None);
        assert!(store.find::<List>(&list.meta.local_id).await.is_err());
        assert!(store.pending_mutations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_ending_mid_push_keeps_server_copy() {
        let remote = MemoryRemote::new();
        let store = LocalStore::open_in_memory().unwrap();
        let epoch = SessionEpoch::new();
        let ctx = SyncContext {
            store: store.clone(),
            remote: Arc::new(LogoutDuringCreate {
                inner: remote.clone(),
                epoch: epoch.clone(),
                store: store.clone(),
            }),
            scope: FamilyScope::new(ServerId::from("fam1")),
            epoch,
            auth: AuthExpiry::new(),
        };
        let sync = SyncOrchestrator::new(ctx);
        let first = store
            .create_list(&ServerId::from("fam1"), "Groceries", ListType::Shopping, None)
            .await
            .unwrap();
        let second = store
            .create_list(&ServerId::from("fam1"), "Chores", ListType::Todo, None)
            .await
            .unwrap();

        let status = sync.trigger_sync().await;
        assert_eq!(status.last_error, None);
        assert_eq!(status.last_synced_at, None);
        assert!(remote
            .get(Collection::Lists, first.meta.server_id.as_str())
            .is_some());
        assert!(remote
            .get(Collection::Lists, second.meta.server_id.as_str())
            .is_none());
        assert!(store.fetch::<List>(&Query::new()).await.unwrap().is_empty());
        assert!(store.pending_mutations().await.unwrap().is_empty());
    }
}
