use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Generation counter of the authenticated session.
///
/// Advanced whenever a session ends. Work started under an older epoch
/// (a fetch in flight during logout, a late push event) must not be
/// applied to the store.
#[derive(Debug, Clone, Default)]
pub struct SessionEpoch(Arc<AtomicU64>);

impl SessionEpoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Capture the current epoch
    pub fn token(&self) -> EpochToken {
        EpochToken {
            epoch: Arc::clone(&self.0),
            value: self.current(),
        }
    }

    /// Invalidate every outstanding token. Returns the new epoch.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// The epoch some unit of work started in
#[derive(Debug, Clone)]
pub struct EpochToken {
    epoch: Arc<AtomicU64>,
    value: u64,
}

impl EpochToken {
    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) == self.value
    }

    pub const fn value(&self) -> u64 {
        self.value
    }
}
