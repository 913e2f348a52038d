//! Typed access to replicated rows

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;

use super::{
    Collection, Family, Geofence, List, ListItem, LocationHistory, Member, RecordMeta, ServerId,
};
use crate::{Error, Result};

/// A replicated entity stored in one collection.
pub trait Model: Serialize + DeserializeOwned + Clone + Debug + PartialEq + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    /// Value of the collection's natural query key.
    fn index_key(&self) -> Option<&ServerId>;

    fn into_record(self) -> Record;

    fn from_record(record: Record) -> Option<Self>;
}

/// A row of any collection
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Record {
    Family(Family),
    Member(Member),
    List(List),
    ListItem(ListItem),
    LocationHistory(LocationHistory),
    Geofence(Geofence),
}

macro_rules! impl_model {
    ($ty:ident, $variant:ident, $collection:expr, |$this:ident| $key:expr) => {
        impl Model for $ty {
            const COLLECTION: Collection = $collection;

            fn meta(&self) -> &RecordMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut RecordMeta {
                &mut self.meta
            }

            fn index_key(&self) -> Option<&ServerId> {
                let $this = self;
                $key
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

impl_model!(Family, Family, Collection::Families, |_this| None);
impl_model!(Member, Member, Collection::Members, |this| Some(&this.family_id));
impl_model!(List, List, Collection::Lists, |this| Some(&this.family_id));
impl_model!(ListItem, ListItem, Collection::ListItems, |this| Some(&this.list_id));
impl_model!(
    LocationHistory,
    LocationHistory,
    Collection::LocationHistory,
    |this| Some(&this.user_id)
);
impl_model!(Geofence, Geofence, Collection::Geofences, |this| Some(&this.family_id));

macro_rules! each_record {
    ($record:expr, |$inner:ident| $body:expr) => {
        match $record {
            Record::Family($inner) => $body,
            Record::Member($inner) => $body,
            Record::List($inner) => $body,
            Record::ListItem($inner) => $body,
            Record::LocationHistory($inner) => $body,
            Record::Geofence($inner) => $body,
        }
    };
}

impl Record {
    pub const fn collection(&self) -> Collection {
        match self {
            Self::Family(_) => Collection::Families,
            Self::Member(_) => Collection::Members,
            Self::List(_) => Collection::Lists,
            Self::ListItem(_) => Collection::ListItems,
            Self::LocationHistory(_) => Collection::LocationHistory,
            Self::Geofence(_) => Collection::Geofences,
        }
    }

    pub fn meta(&self) -> &RecordMeta {
        each_record!(self, |inner| inner.meta())
    }

    pub fn meta_mut(&mut self) -> &mut RecordMeta {
        each_record!(self, |inner| inner.meta_mut())
    }

    pub fn server_id(&self) -> &ServerId {
        &self.meta().server_id
    }

    pub fn index_key(&self) -> Option<&ServerId> {
        each_record!(self, |inner| inner.index_key())
    }

    /// Position timestamp for location history rows
    pub const fn timestamp(&self) -> Option<i64> {
        match self {
            Self::LocationHistory(point) => Some(point.timestamp),
            _ => None,
        }
    }

    /// Flat JSON form, as stored in the row's data column.
    pub fn to_value(&self) -> Result<Value> {
        Ok(each_record!(self, |inner| serde_json::to_value(inner))?)
    }

    /// Decode the flat JSON form of a row of `collection`.
    pub fn from_value(collection: Collection, value: Value) -> Result<Self> {
        let record = match collection {
            Collection::Families => Self::Family(serde_json::from_value(value)?),
            Collection::Members => Self::Member(serde_json::from_value(value)?),
            Collection::Lists => Self::List(serde_json::from_value(value)?),
            Collection::ListItems => Self::ListItem(serde_json::from_value(value)?),
            Collection::LocationHistory => Self::LocationHistory(serde_json::from_value(value)?),
            Collection::Geofences => Self::Geofence(serde_json::from_value(value)?),
        };
        Ok(record)
    }

    /// Downcast into a concrete model.
    pub fn into_model<T: Model>(self) -> Result<T> {
        let collection = self.collection();
        T::from_record(self).ok_or_else(|| {
            Error::Schema(format!(
                "expected a {} row, found {}",
                T::COLLECTION.label(),
                collection.label()
            ))
        })
    }
}

/// Decode a stored row into `T`. Used as the decoder of typed live queries.
pub(crate) fn decode_model<T: Model>(collection: Collection, value: Value) -> Result<T> {
    Record::from_value(collection, value)?.into_model()
}

/// Decode a stored row of any collection.
pub(crate) fn decode_record(collection: Collection, value: Value) -> Result<Record> {
    Record::from_value(collection, value)
}
