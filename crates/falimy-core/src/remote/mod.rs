//! Boundary to the remote source of truth
//!
//! [`RemoteClient`] is everything the sync layer needs from the backend: a
//! family-scoped full fetch, one push channel for realtime events, and the
//! three record mutations used to drain the outbox.

mod envelope;
mod memory;
mod pocketbase;
mod sse;

use async_trait::async_trait;

use crate::models::{Collection, ServerId};
use crate::Result;

pub use envelope::{PushAction, PushEvent, RemoteRecord};
pub use memory::MemoryRemote;
pub use pocketbase::PocketBaseClient;
pub use sse::{SseDecoder, SseMessage};

/// Authenticated access to the backend
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Every record of `collection` visible to the family, in any order
    async fn fetch_all(
        &self,
        collection: Collection,
        family_id: &ServerId,
    ) -> Result<Vec<RemoteRecord>>;

    /// Open one push channel carrying events for all of `collections`
    async fn open_channel(&self, collections: &[Collection]) -> Result<Box<dyn PushChannel>>;

    /// Create a record. `fields` carries the client-generated id.
    async fn create_record(
        &self,
        collection: Collection,
        fields: RemoteRecord,
    ) -> Result<RemoteRecord>;

    async fn update_record(
        &self,
        collection: Collection,
        id: &ServerId,
        fields: RemoteRecord,
    ) -> Result<RemoteRecord>;

    async fn delete_record(&self, collection: Collection, id: &ServerId) -> Result<()>;
}

/// An open realtime transport
#[async_trait]
pub trait PushChannel: Send {
    /// Next event in arrival order. `None` once the transport has ended.
    async fn next_event(&mut self) -> Option<Result<PushEvent>>;

    /// Release the transport. Idempotent.
    async fn close(&mut self);
}
