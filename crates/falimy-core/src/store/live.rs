//! Live queries: result sets that follow commits

use serde_json::Value;
use tokio::sync::watch;

use super::{Commit, LocalStore, Query};
use crate::models::Collection;
use crate::Result;

type Decode<T> = fn(Collection, Value) -> Result<T>;

/// A query that re-yields its result whenever a commit changes it.
///
/// The first [`next`](Self::next) resolves immediately with the current
/// result. Each later call waits for a commit touching the queried
/// collection and yields only if the result actually differs from the last
/// one. Dropping the query or calling [`unsubscribe`](Self::unsubscribe)
/// stops it.
pub struct LiveQuery<T> {
    store: LocalStore,
    collection: Collection,
    query: Query,
    decode: Decode<T>,
    commits: Option<watch::Receiver<Commit>>,
    last: Option<Vec<T>>,
    seen: u64,
}

impl<T: Clone + PartialEq> LiveQuery<T> {
    pub(crate) fn new(
        store: LocalStore,
        collection: Collection,
        query: Query,
        decode: Decode<T>,
    ) -> Self {
        let commits = Some(store.commits());
        Self {
            store,
            collection,
            query,
            decode,
            commits,
            last: None,
            seen: 0,
        }
    }

    pub const fn collection(&self) -> Collection {
        self.collection
    }

    /// Still attached to the store
    pub const fn is_active(&self) -> bool {
        self.commits.is_some()
    }

    /// Next result set, or `None` once unsubscribed.
    pub async fn next(&mut self) -> Option<Result<Vec<T>>> {
        loop {
            let commits = self.commits.as_mut()?;

            if self.last.is_some() && commits.changed().await.is_err() {
                self.commits = None;
                return None;
            }
            let stamp = commits
                .borrow_and_update()
                .stamp(self.collection.dependencies());

            if self.last.is_some() && stamp == self.seen {
                continue;
            }
            self.seen = stamp;

            let rows = match self.current().await {
                Ok(rows) => rows,
                Err(error) => return Some(Err(error)),
            };
            if self.last.as_ref() == Some(&rows) {
                continue;
            }
            self.last = Some(rows.clone());
            return Some(Ok(rows));
        }
    }

    /// Run the query once against the current state.
    pub async fn current(&self) -> Result<Vec<T>> {
        let rows = self.store.select(self.collection, &self.query).await?;
        rows.into_iter()
            .map(|row| (self.decode)(self.collection, row))
            .collect()
    }

    /// Detach from the store. Idempotent.
    pub fn unsubscribe(&mut self) {
        if self.commits.take().is_some() {
            tracing::trace!("Live query on {} unsubscribed", self.collection);
        }
        self.last = None;
    }

    /// Make the next call yield the current result again, re-attaching if
    /// the query was unsubscribed.
    pub fn restart(&mut self) {
        if self.commits.is_none() {
            self.commits = Some(self.store.commits());
        }
        self.last = None;
    }
}

impl<T> std::fmt::Debug for LiveQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("collection", &self.collection)
            .field("query", &self.query)
            .field("active", &self.commits.is_some())
            .finish_non_exhaustive()
    }
}
