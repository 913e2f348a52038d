//! Reconciliation between the local replica and the backend
//!
//! Two paths feed remote state into the [`LocalStore`]: the
//! [`SyncOrchestrator`] (outbox push plus full family-scoped pull) and the
//! [`RealtimeManager`] (incremental push events). Both decode payloads with
//! [`codec`] and resolve conflicts with the same last-write-wins [`merge`].

pub mod codec;
mod epoch;
pub mod merge;
mod orchestrator;
mod realtime;
mod scope;

use std::sync::Arc;

use tokio::sync::watch;

use crate::remote::RemoteClient;
use crate::store::LocalStore;

pub use epoch::{EpochToken, SessionEpoch};
pub use merge::{MergeOutcome, RemoteChange};
pub use orchestrator::{
    FailureKind, SyncFailure, SyncOrchestrator, SyncReport, SyncStatus, DEFAULT_LOCATION_RETENTION,
};
pub use realtime::{RealtimeManager, RealtimeState, RealtimeStats};
pub use scope::FamilyScope;

/// Raised when the backend rejects the session token.
///
/// Cleared only when a new session begins.
#[derive(Debug, Clone)]
pub struct AuthExpiry(Arc<watch::Sender<bool>>);

impl AuthExpiry {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self(Arc::new(sender))
    }

    pub fn raise(&self) {
        if !self.0.send_replace(true) {
            tracing::warn!("Session token rejected by the server; re-authentication required");
        }
    }

    pub fn reset(&self) {
        self.0.send_replace(false);
    }

    pub fn is_raised(&self) -> bool {
        *self.0.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for AuthExpiry {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything a reconciliation path needs for one session
#[derive(Clone)]
pub struct SyncContext {
    pub store: LocalStore,
    pub remote: Arc<dyn RemoteClient>,
    pub scope: FamilyScope,
    pub epoch: SessionEpoch,
    pub auth: AuthExpiry,
}

impl SyncContext {
    pub fn new(store: LocalStore, remote: Arc<dyn RemoteClient>, scope: FamilyScope) -> Self {
        Self {
            store,
            remote,
            scope,
            epoch: SessionEpoch::new(),
            auth: AuthExpiry::new(),
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("store", &self.store)
            .field("scope", &self.scope)
            .field("epoch", &self.epoch.current())
            .finish_non_exhaustive()
    }
}
