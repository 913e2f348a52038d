//! Data models for Falimy

mod collection;
mod family;
mod geofence;
mod ids;
mod list;
mod location;
mod member;
mod meta;
mod record;

pub use collection::{Collection, CollectionSet};
pub use family::Family;
pub use geofence::{Geofence, GeofenceTrigger};
pub use ids::{LocalId, ServerId};
pub use list::{List, ListItem, ListStatus, ListType};
pub use location::LocationHistory;
pub use member::{Member, MemberRole, SharingMode};
pub use meta::{RecordMeta, RowState};
pub use record::{Model, Record};

pub(crate) use record::{decode_model, decode_record};
