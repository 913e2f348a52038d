//! Per-login session: one authenticated remote handle and the background
//! tasks that keep the replica reconciled with it

mod lifecycle;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::auth::AuthIdentity;
use crate::config::ClientConfig;
use crate::db::sync_meta::FAMILY_ID;
use crate::db::SyncMetaRepository;
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use crate::sync::{
    AuthExpiry, FamilyScope, RealtimeManager, RealtimeState, SessionEpoch, SyncContext,
    SyncOrchestrator, SyncStatus, DEFAULT_LOCATION_RETENTION,
};
use crate::Result;

pub use lifecycle::AppLifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub sync_interval: Duration,
    pub location_retention: Duration,
    pub realtime_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(crate::config::DEFAULT_SYNC_INTERVAL_SECS),
            location_retention: DEFAULT_LOCATION_RETENTION,
            realtime_enabled: true,
        }
    }
}

impl From<&ClientConfig> for SessionOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            sync_interval: config.sync_interval(),
            location_retention: config.location_retention(),
            realtime_enabled: config.realtime_enabled,
        }
    }
}

struct ActiveSession {
    identity: AuthIdentity,
    realtime: Arc<RealtimeManager>,
    sync: Arc<SyncOrchestrator>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    async fn shut_down(self) {
        for task in &self.tasks {
            task.abort();
        }
        self.realtime.unsubscribe().await;
        tracing::info!("Session for {} closed", self.identity.user_id);
    }
}

/// Owns the live session for one replica.
///
/// [`begin`](Self::begin) installs a new authenticated remote handle and
/// starts the initial sync, the realtime subscription, the interval timer
/// and the lifecycle listener. Only one session is live at a time; beginning
/// another closes the previous one first.
pub struct SessionContext {
    store: LocalStore,
    options: SessionOptions,
    lifecycle: watch::Sender<AppLifecycle>,
    epoch: SessionEpoch,
    auth: AuthExpiry,
    active: Mutex<Option<ActiveSession>>,
}

impl SessionContext {
    pub fn new(store: LocalStore, options: SessionOptions) -> Self {
        let (lifecycle, _) = watch::channel(AppLifecycle::Foreground);
        Self {
            store,
            options,
            lifecycle,
            epoch: SessionEpoch::new(),
            auth: AuthExpiry::new(),
            active: Mutex::new(None),
        }
    }

    pub const fn store(&self) -> &LocalStore {
        &self.store
    }

    pub const fn options(&self) -> SessionOptions {
        self.options
    }

    /// Start a session for `identity` against `remote`.
    ///
    /// A replica filled for another family is cleared before anything is
    /// fetched.
    pub async fn begin(&self, identity: AuthIdentity, remote: Arc<dyn RemoteClient>) -> Result<()> {
        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.shut_down().await;
            self.epoch.advance();
        }

        let family_id = identity.family_id.clone();
        let switched = self
            .store
            .write(|txn| {
                let previous = txn.sync_meta().get(FAMILY_ID)?;
                let switched = previous.is_some_and(|previous| previous != family_id.as_str());
                if switched {
                    txn.clear()?;
                }
                txn.sync_meta().set(FAMILY_ID, family_id.as_str())?;
                Ok(switched)
            })
            .await?;
        if switched {
            tracing::info!("Replica belonged to another family; cleared it");
        }
        self.auth.reset();

        let ctx = SyncContext {
            store: self.store.clone(),
            remote,
            scope: FamilyScope::new(family_id),
            epoch: self.epoch.clone(),
            auth: self.auth.clone(),
        };
        let realtime = Arc::new(RealtimeManager::new(ctx.clone()));
        let sync = Arc::new(
            SyncOrchestrator::new(ctx).with_location_retention(self.options.location_retention),
        );
        if let Err(error) = sync.restore_status().await {
            tracing::warn!("Failed to load sync bookkeeping: {error}");
        }

        let tasks = vec![
            self.spawn_initial(&realtime, &sync),
            self.spawn_interval(&sync),
            self.spawn_lifecycle_listener(&realtime, &sync),
        ];
        tracing::info!(
            "Session started for {} in family {}",
            identity.user_id,
            identity.family_id
        );
        *active = Some(ActiveSession {
            identity,
            realtime,
            sync,
            tasks,
        });
        Ok(())
    }

    /// End the session but keep the replica for the next login.
    pub async fn close(&self) {
        if let Some(session) = self.active.lock().await.take() {
            session.shut_down().await;
        }
        self.epoch.advance();
    }

    /// End the session and wipe every replicated row.
    pub async fn logout(&self) -> Result<()> {
        self.close().await;
        self.store.clear().await
    }

    pub fn set_lifecycle(&self, lifecycle: AppLifecycle) {
        self.lifecycle.send_if_modified(|current| {
            let changed = *current != lifecycle;
            *current = lifecycle;
            changed
        });
    }

    pub fn lifecycle(&self) -> AppLifecycle {
        *self.lifecycle.borrow()
    }

    pub async fn identity(&self) -> Option<AuthIdentity> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| session.identity.clone())
    }

    pub async fn is_active(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Run a sync now. `None` without a session.
    pub async fn trigger_sync(&self) -> Option<SyncStatus> {
        let sync = self.sync().await?;
        Some(sync.trigger_sync().await)
    }

    pub async fn sync_status(&self) -> Option<SyncStatus> {
        Some(self.sync().await?.status())
    }

    pub async fn watch_sync_status(&self) -> Option<watch::Receiver<SyncStatus>> {
        Some(self.sync().await?.watch_status())
    }

    pub async fn realtime(&self) -> Option<Arc<RealtimeManager>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| Arc::clone(&session.realtime))
    }

    pub async fn realtime_state(&self) -> RealtimeState {
        self.realtime()
            .await
            .map_or(RealtimeState::Idle, |realtime| realtime.state())
    }

    /// Whether the server rejected the session token since `begin`
    pub fn auth_expired(&self) -> bool {
        self.auth.is_raised()
    }

    pub fn watch_auth_expired(&self) -> watch::Receiver<bool> {
        self.auth.watch()
    }

    async fn sync(&self) -> Option<Arc<SyncOrchestrator>> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|session| Arc::clone(&session.sync))
    }

    fn spawn_initial(
        &self,
        realtime: &Arc<RealtimeManager>,
        sync: &Arc<SyncOrchestrator>,
    ) -> JoinHandle<()> {
        let realtime = Arc::clone(realtime);
        let sync = Arc::clone(sync);
        let realtime_enabled = self.options.realtime_enabled;
        tokio::spawn(async move {
            if realtime_enabled {
                realtime.subscribe().await;
            }
            sync.trigger_sync().await;
        })
    }

    fn spawn_interval(&self, sync: &Arc<SyncOrchestrator>) -> JoinHandle<()> {
        let sync = Arc::clone(sync);
        let period = self.options.sync_interval;
        let lifecycle = self.lifecycle.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if lifecycle.borrow().is_foreground() {
                    tracing::debug!("Interval sync");
                    sync.trigger_sync().await;
                }
            }
        })
    }

    fn spawn_lifecycle_listener(
        &self,
        realtime: &Arc<RealtimeManager>,
        sync: &Arc<SyncOrchestrator>,
    ) -> JoinHandle<()> {
        let realtime = Arc::clone(realtime);
        let sync = Arc::clone(sync);
        let realtime_enabled = self.options.realtime_enabled;
        let mut lifecycle = self.lifecycle.subscribe();
        lifecycle.mark_unchanged();
        tokio::spawn(async move {
            while lifecycle.changed().await.is_ok() {
                let current = *lifecycle.borrow_and_update();
                if current.is_foreground() {
                    tracing::debug!("App returned to the foreground");
                    if realtime_enabled {
                        realtime.on_foreground().await;
                    }
                    sync.trigger_sync().await;
                }
            }
        })
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        if let Some(session) = self.active.get_mut().take() {
            for task in &session.tasks {
                task.abort();
            }
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("store", &self.store)
            .field("options", &self.options)
            .field("lifecycle", &self.lifecycle())
            .field("epoch", &self.epoch.current())
            .finish_non_exhaustive()
    }
}
