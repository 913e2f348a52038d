//! In-process backend used by tests and offline demos

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{PushAction, PushChannel, PushEvent, RemoteClient, RemoteRecord};
use crate::models::{Collection, ServerId};
use crate::util::unix_millis_now;
use crate::{Error, Result};

type Sender = mpsc::UnboundedSender<Result<PushEvent>>;

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<(Collection, String), RemoteRecord>,
    channels: Vec<Sender>,
    opened: usize,
    fetches: usize,
    offline: bool,
    auth_expired: bool,
    clock: i64,
}

impl MemoryState {
    fn tick(&mut self) -> i64 {
        self.clock = unix_millis_now().max(self.clock + 1);
        self.clock
    }

    fn check_online(&self) -> Result<()> {
        if self.auth_expired {
            return Err(Error::AuthExpired);
        }
        if self.offline {
            return Err(Error::Transport("memory remote is offline".to_string()));
        }
        Ok(())
    }

    fn broadcast(&mut self, event: &PushEvent) {
        self.channels
            .retain(|channel| channel.send(Ok(event.clone())).is_ok());
    }

    fn field<'a>(&'a self, collection: Collection, id: &str, field: &str) -> Option<&'a str> {
        self.records
            .get(&(collection, id.to_string()))
            .and_then(|record| record.get(field))
            .and_then(Value::as_str)
    }

    /// Same scoping the server's list rules apply
    fn in_family(&self, collection: Collection, record: &RemoteRecord, family: &str) -> bool {
        let text = |field: &str| record.get(field).and_then(Value::as_str);
        match collection {
            Collection::Families => text("id") == Some(family),
            Collection::Members | Collection::Lists | Collection::Geofences => {
                text("family_id") == Some(family)
            }
            Collection::ListItems => text("list_id").is_some_and(|list| {
                self.field(Collection::Lists, list, "family_id") == Some(family)
            }),
            Collection::LocationHistory => text("user_id").is_some_and(|user| {
                self.field(Collection::Members, user, "family_id") == Some(family)
            }),
        }
    }
}

/// A backend living in memory.
///
/// Server writes stamp `updated` with a monotonic clock and are broadcast to
/// every open channel, like a real server echoing changes to subscribers.
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn record_id(record: &RemoteRecord) -> String {
        record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// Store a record as-is without notifying channels.
    pub fn seed(&self, collection: Collection, record: Value) {
        if let Value::Object(record) = record {
            let id = Self::record_id(&record);
            self.state().records.insert((collection, id), record);
        }
    }

    /// Store a record and broadcast it as a push event.
    pub fn publish(&self, action: PushAction, collection: Collection, record: Value) {
        let Value::Object(record) = record else {
            return;
        };
        let id = Self::record_id(&record);
        let mut state = self.state();
        if action == PushAction::Delete {
            state.records.remove(&(collection, id));
        } else {
            state.records.insert((collection, id), record.clone());
        }
        state.broadcast(&PushEvent::new(action, collection, record));
    }

    /// Deliver an arbitrary event without touching stored records.
    pub fn emit(&self, event: PushEvent) {
        self.state().broadcast(&event);
    }

    /// Server-side record, if any
    pub fn get(&self, collection: Collection, id: &str) -> Option<RemoteRecord> {
        self.state()
            .records
            .get(&(collection, id.to_string()))
            .cloned()
    }

    pub fn records(&self, collection: Collection) -> Vec<RemoteRecord> {
        self.state()
            .records
            .iter()
            .filter(|((stored, _), _)| *stored == collection)
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// End every open channel, as if the connection dropped.
    pub fn drop_transport(&self) {
        self.state().channels.clear();
    }

    /// Channels opened so far
    pub fn open_channel_count(&self) -> usize {
        self.state().opened
    }

    /// Channels whose receiving side is still alive
    pub fn live_channel_count(&self) -> usize {
        let mut state = self.state();
        state.channels.retain(|channel| !channel.is_closed());
        state.channels.len()
    }

    pub fn fetch_count(&self) -> usize {
        self.state().fetches
    }

    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn set_auth_expired(&self, expired: bool) {
        self.state().auth_expired = expired;
    }
}

impl std::fmt::Debug for MemoryRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("MemoryRemote")
            .field("records", &state.records.len())
            .field("channels", &state.channels.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn fetch_all(
        &self,
        collection: Collection,
        family_id: &ServerId,
    ) -> Result<Vec<RemoteRecord>> {
        let mut state = self.state();
        state.check_online()?;
        state.fetches += 1;
        Ok(state
            .records
            .iter()
            .filter(|((stored, _), record)| {
                *stored == collection && state.in_family(collection, record, family_id.as_str())
            })
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn open_channel(&self, _collections: &[Collection]) -> Result<Box<dyn PushChannel>> {
        let mut state = self.state();
        state.check_online()?;
        let (sender, receiver) = mpsc::unbounded_channel();
        state.channels.push(sender);
        state.opened += 1;
        Ok(Box::new(MemoryChannel { receiver }))
    }

    async fn create_record(
        &self,
        collection: Collection,
        mut fields: RemoteRecord,
    ) -> Result<RemoteRecord> {
        let mut state = self.state();
        state.check_online()?;
        let id = Self::record_id(&fields);
        let id = if id.is_empty() {
            ServerId::generate().to_string()
        } else {
            id
        };
        if state.records.contains_key(&(collection, id.clone())) {
            return Err(Error::Rejected {
                status: 400,
                message: format!("record {id} already exists"),
            });
        }

        let now = state.tick();
        fields.insert("id".to_string(), Value::from(id.clone()));
        fields.insert("created".to_string(), Value::from(now));
        fields.insert("updated".to_string(), Value::from(now));
        state.records.insert((collection, id), fields.clone());
        state.broadcast(&PushEvent::new(PushAction::Create, collection, fields.clone()));
        Ok(fields)
    }

    async fn update_record(
        &self,
        collection: Collection,
        id: &ServerId,
        fields: RemoteRecord,
    ) -> Result<RemoteRecord> {
        let mut state = self.state();
        state.check_online()?;
        let now = state.tick();
        let Some(record) = state.records.get_mut(&(collection, id.to_string())) else {
            return Err(Error::Rejected {
                status: 404,
                message: format!("record {id} not found"),
            });
        };
        for (key, value) in fields {
            if key != "id" && key != "created" {
                record.insert(key, value);
            }
        }
        record.insert("updated".to_string(), Value::from(now));
        let record = record.clone();
        state.broadcast(&PushEvent::new(PushAction::Update, collection, record.clone()));
        Ok(record)
    }

    async fn delete_record(&self, collection: Collection, id: &ServerId) -> Result<()> {
        let mut state = self.state();
        state.check_online()?;
        let Some(record) = state.records.remove(&(collection, id.to_string())) else {
            return Err(Error::Rejected {
                status: 404,
                message: format!("record {id} not found"),
            });
        };
        if collection == Collection::Lists {
            let items: Vec<String> = state
                .records
                .iter()
                .filter(|((stored, _), item)| {
                    *stored == Collection::ListItems
                        && item.get("list_id").and_then(Value::as_str) == Some(id.as_str())
                })
                .map(|((_, item_id), _)| item_id.clone())
                .collect();
            for item_id in items {
                state.records.remove(&(Collection::ListItems, item_id));
            }
        }
        state.broadcast(&PushEvent::new(PushAction::Delete, collection, record));
        Ok(())
    }
}

struct MemoryChannel {
    receiver: mpsc::UnboundedReceiver<Result<PushEvent>>,
}

#[async_trait]
impl PushChannel for MemoryChannel {
    async fn next_event(&mut self) -> Option<Result<PushEvent>> {
        self.receiver.recv().await
    }

    async fn close(&mut self) {
        self.receiver.close();
    }
}
