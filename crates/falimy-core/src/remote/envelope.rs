//! Push event envelope

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::Collection;
use crate::{Error, Result};

/// A record as the backend returns it: loosely shaped JSON. It is decoded
/// into a typed record before anything reaches the store.
pub type RemoteRecord = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushAction {
    Create,
    Update,
    Delete,
}

/// One server push: `{ action, collection, record }`
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub action: PushAction,
    pub collection: Collection,
    pub record: RemoteRecord,
}

#[derive(Deserialize)]
struct RawEnvelope {
    action: PushAction,
    #[serde(default)]
    collection: Option<String>,
    record: RemoteRecord,
}

impl PushEvent {
    pub const fn new(action: PushAction, collection: Collection, record: RemoteRecord) -> Self {
        Self {
            action,
            collection,
            record,
        }
    }

    /// Parse an event payload.
    ///
    /// The collection comes from the payload when present, otherwise from
    /// `topic` (the subscription the event arrived on, e.g. `lists/*`).
    pub fn parse(topic: Option<&str>, data: &str) -> Result<Self> {
        let raw: RawEnvelope = serde_json::from_str(data)?;
        let name = raw
            .collection
            .as_deref()
            .or_else(|| {
                raw.record
                    .get("collectionName")
                    .and_then(Value::as_str)
            })
            .or_else(|| topic.and_then(|topic| topic.split('/').next()))
            .ok_or_else(|| Error::Schema("push event without a collection".to_string()))?;
        let collection = Collection::from_remote_name(name)
            .ok_or_else(|| Error::Schema(format!("unknown collection: {name:?}")))?;

        Ok(Self::new(raw.action, collection, raw.record))
    }
}
