//! Realtime reconciliation: one push channel applied event by event

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use super::merge::{apply_change, MergeOutcome, RemoteChange};
use super::{EpochToken, SyncContext};
use crate::models::Collection;
use crate::remote::{PushChannel, PushEvent};
use crate::util::unix_millis_now;
use crate::Error;

/// Subscription state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RealtimeState {
    #[default]
    Idle,
    Connecting,
    Subscribed,
    Reconnecting,
}

/// Counters of what the pump did with received events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RealtimeStats {
    pub applied: u64,
    pub ignored: u64,
    pub quarantined: u64,
    pub out_of_scope: u64,
}

#[derive(Debug, Default)]
struct Counters {
    applied: AtomicU64,
    ignored: AtomicU64,
    quarantined: AtomicU64,
    out_of_scope: AtomicU64,
}

struct Shared {
    ctx: SyncContext,
    state: watch::Sender<RealtimeState>,
    /// Whether the current transport is known to be delivering
    alive: AtomicBool,
    counters: Counters,
    last_error: std::sync::Mutex<Option<String>>,
}

impl Shared {
    fn set_state(&self, next: RealtimeState) {
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn record_error(&self, error: &Error) {
        if matches!(error, Error::AuthExpired) {
            self.ctx.auth.raise();
        }
        if let Ok(mut last_error) = self.last_error.lock() {
            *last_error = Some(error.to_string());
        }
    }

    async fn apply(&self, token: &EpochToken, event: PushEvent) {
        let change = match RemoteChange::from_event(&event, unix_millis_now()) {
            Ok(change) => change,
            Err(error) => {
                self.counters.quarantined.fetch_add(1, Ordering::SeqCst);
                tracing::warn!(
                    "Quarantined malformed {} event: {error}",
                    event.collection.remote_name()
                );
                return;
            }
        };
        if !token.is_current() {
            return;
        }

        let scope = self.ctx.scope.clone();
        let collection = change.collection();
        match self
            .ctx
            .store
            .write(move |txn| apply_change(txn, &scope, change))
            .await
        {
            Ok(outcome) => {
                let counter = match outcome {
                    MergeOutcome::Inserted | MergeOutcome::Updated | MergeOutcome::Deleted => {
                        &self.counters.applied
                    }
                    MergeOutcome::Ignored => &self.counters.ignored,
                    MergeOutcome::OutOfScope => &self.counters.out_of_scope,
                };
                counter.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    "Realtime {:?} on {}: {outcome:?}",
                    event.action,
                    collection.remote_name()
                );
            }
            Err(error) => {
                tracing::warn!(
                    "Failed to apply realtime event on {}: {error}",
                    collection.remote_name()
                );
            }
        }
    }
}

struct PumpHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PumpHandle {
    async fn stop(self) {
        let _ = self.shutdown.send(());
        if let Err(error) = self.task.await {
            if error.is_panic() {
                tracing::error!("Realtime pump panicked: {error}");
            }
        }
    }
}

/// Keeps at most one push channel open for the session and applies its
/// events to the store, each in its own transaction, in arrival order.
///
/// Connection failures are never retried here: the manager falls back to
/// [`RealtimeState::Idle`] and waits for the next `subscribe()` or
/// `on_foreground()`.
pub struct RealtimeManager {
    shared: Arc<Shared>,
    pump: Mutex<Option<PumpHandle>>,
}

impl RealtimeManager {
    pub fn new(ctx: SyncContext) -> Self {
        let (state, _) = watch::channel(RealtimeState::Idle);
        Self {
            shared: Arc::new(Shared {
                ctx,
                state,
                alive: AtomicBool::new(false),
                counters: Counters::default(),
                last_error: std::sync::Mutex::new(None),
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> RealtimeState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<RealtimeState> {
        self.shared.state.subscribe()
    }

    pub fn subscribed(&self) -> bool {
        self.state() == RealtimeState::Subscribed
    }

    /// Whether the open channel is still delivering events
    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> RealtimeStats {
        let counters = &self.shared.counters;
        RealtimeStats {
            applied: counters.applied.load(Ordering::SeqCst),
            ignored: counters.ignored.load(Ordering::SeqCst),
            quarantined: counters.quarantined.load(Ordering::SeqCst),
            out_of_scope: counters.out_of_scope.load(Ordering::SeqCst),
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.shared
            .last_error
            .lock()
            .ok()
            .and_then(|last_error| last_error.clone())
    }

    /// Open the push channel. No-op while subscribed.
    pub async fn subscribe(&self) {
        let mut pump = self.pump.lock().await;
        if self.subscribed() {
            return;
        }
        self.connect(&mut pump, RealtimeState::Connecting).await;
    }

    /// Close the push channel. Idempotent.
    pub async fn unsubscribe(&self) {
        let mut pump = self.pump.lock().await;
        if let Some(handle) = pump.take() {
            handle.stop().await;
            tracing::info!("Realtime subscription closed");
        }
        self.shared.alive.store(false, Ordering::SeqCst);
        self.shared.set_state(RealtimeState::Idle);
    }

    /// Called when the app returns to the foreground. A subscription whose
    /// transport has died is torn down and opened again, and an idle manager
    /// (failed subscribe, failed reconnect) subscribes afresh unless the
    /// session token was rejected.
    pub async fn on_foreground(&self) {
        let mut pump = self.pump.lock().await;
        match self.state() {
            RealtimeState::Subscribed if !self.is_alive() => {
                tracing::info!("Realtime transport is stale; reconnecting");
                self.connect(&mut pump, RealtimeState::Reconnecting).await;
            }
            RealtimeState::Idle if !self.shared.ctx.auth.is_raised() => {
                tracing::info!("Realtime not subscribed; subscribing");
                self.connect(&mut pump, RealtimeState::Connecting).await;
            }
            _ => {}
        }
    }

    async fn connect(&self, pump: &mut Option<PumpHandle>, via: RealtimeState) {
        if let Some(stale) = pump.take() {
            stale.stop().await;
        }
        let shared = &self.shared;
        shared.alive.store(false, Ordering::SeqCst);
        shared.set_state(via);

        let token = shared.ctx.epoch.token();
        match shared.ctx.remote.open_channel(&Collection::ALL).await {
            Ok(mut channel) => {
                if !token.is_current() {
                    channel.close().await;
                    shared.set_state(RealtimeState::Idle);
                    return;
                }
                shared.alive.store(true, Ordering::SeqCst);
                shared.set_state(RealtimeState::Subscribed);

                let (shutdown, shutdown_rx) = oneshot::channel();
                let task = tokio::spawn(run_pump(
                    Arc::clone(&self.shared),
                    channel,
                    shutdown_rx,
                    token,
                ));
                *pump = Some(PumpHandle { shutdown, task });
                tracing::info!(
                    "Realtime subscribed to {} collections",
                    Collection::ALL.len()
                );
            }
            Err(error) => {
                tracing::warn!("Realtime subscribe failed: {error}");
                shared.record_error(&error);
                shared.set_state(RealtimeState::Idle);
            }
        }
    }
}

impl std::fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl Drop for RealtimeManager {
    fn drop(&mut self) {
        if let Some(handle) = self.pump.get_mut().take() {
            handle.task.abort();
        }
    }
}

async fn run_pump(
    shared: Arc<Shared>,
    mut channel: Box<dyn PushChannel>,
    mut shutdown: oneshot::Receiver<()>,
    token: EpochToken,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = channel.next_event() => match event {
                Some(Ok(event)) => shared.apply(&token, event).await,
                Some(Err(error @ (Error::Schema(_) | Error::Serialization(_) | Error::InvalidRecord { .. }))) => {
                    shared.counters.quarantined.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!("Quarantined unreadable push event: {error}");
                }
                Some(Err(error)) => {
                    tracing::warn!("Realtime transport failed: {error}");
                    shared.alive.store(false, Ordering::SeqCst);
                    shared.record_error(&error);
                    if matches!(error, Error::AuthExpired) {
                        shared.set_state(RealtimeState::Idle);
                    }
                    break;
                }
                None => {
                    tracing::info!("Realtime transport closed by the server");
                    shared.alive.store(false, Ordering::SeqCst);
                    break;
                }
            },
        }
    }
    channel.close().await;
}
