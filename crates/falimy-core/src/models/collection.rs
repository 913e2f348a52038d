//! Replicated collections and their storage/remote names

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A replicated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Families,
    Members,
    Lists,
    ListItems,
    LocationHistory,
    Geofences,
}

impl Collection {
    /// All collections, parents before children.
    pub const ALL: [Self; 6] = [
        Self::Families,
        Self::Members,
        Self::Lists,
        Self::ListItems,
        Self::LocationHistory,
        Self::Geofences,
    ];

    /// Local table name
    pub const fn table(self) -> &'static str {
        match self {
            Self::Families => "families",
            Self::Members => "members",
            Self::Lists => "lists",
            Self::ListItems => "list_items",
            Self::LocationHistory => "location_history",
            Self::Geofences => "geofences",
        }
    }

    /// Backend collection name. Members live in the backend's auth collection.
    pub const fn remote_name(self) -> &'static str {
        match self {
            Self::Members => "users",
            other => other.table(),
        }
    }

    /// Singular label used in error messages
    pub const fn label(self) -> &'static str {
        match self {
            Self::Families => "family",
            Self::Members => "member",
            Self::Lists => "list",
            Self::ListItems => "list item",
            Self::LocationHistory => "location point",
            Self::Geofences => "geofence",
        }
    }

    /// Natural query key with a secondary index, if any.
    pub const fn index_field(self) -> Option<&'static str> {
        match self {
            Self::Families => None,
            Self::Members | Self::Lists | Self::Geofences => Some("family_id"),
            Self::ListItems => Some("list_id"),
            Self::LocationHistory => Some("user_id"),
        }
    }

    /// Queryable fields of the entity stored in this collection.
    pub const fn fields(self) -> &'static [&'static str] {
        match self {
            Self::Families => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "name",
                "invite_code",
                "created_by",
            ],
            Self::Members => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "family_id",
                "name",
                "email",
                "role",
                "location_sharing_mode",
                "last_lat",
                "last_lng",
                "last_location_at",
            ],
            Self::Lists => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "family_id",
                "name",
                "list_type",
                "status",
                "sort_order",
                "created_by",
                "assigned_to",
            ],
            Self::ListItems => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "list_id",
                "name",
                "quantity",
                "note",
                "is_checked",
                "checked_by",
                "sort_order",
                "created_by",
            ],
            Self::LocationHistory => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "user_id",
                "lat",
                "lng",
                "accuracy",
                "battery_level",
                "timestamp",
            ],
            Self::Geofences => &[
                "local_id",
                "server_id",
                "created_at",
                "updated_at",
                "family_id",
                "name",
                "lat",
                "lng",
                "radius",
                "trigger_on",
                "watch_user_id",
                "notify_user_id",
                "enabled",
            ],
        }
    }

    /// Resolve a backend collection name.
    pub fn from_remote_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.remote_name() == name)
    }

    /// Position in [`Collection::ALL`]
    pub const fn position(self) -> usize {
        match self {
            Self::Families => 0,
            Self::Members => 1,
            Self::Lists => 2,
            Self::ListItems => 3,
            Self::LocationHistory => 4,
            Self::Geofences => 5,
        }
    }

    /// Collections whose commits can change a query over this one.
    /// List items disappear with their list.
    pub fn dependencies(self) -> CollectionSet {
        let mut set = CollectionSet::empty();
        set.insert(self);
        if self == Self::ListItems {
            set.insert(Self::Lists);
        }
        set
    }

    const fn bit(self) -> u8 {
        1 << self.position()
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = Error;

    /// Accepts either the local table name or the backend collection name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim();
        Self::ALL
            .into_iter()
            .find(|collection| collection.table() == name)
            .or_else(|| Self::from_remote_name(name))
            .ok_or_else(|| Error::Schema(format!("unknown collection: {name:?}")))
    }
}

/// Set of collections touched by a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CollectionSet(u8);

impl CollectionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b11_1111)
    }

    pub fn insert(&mut self, collection: Collection) {
        self.0 |= collection.bit();
    }

    pub const fn contains(self, collection: Collection) -> bool {
        self.0 & collection.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Collection> {
        Collection::ALL
            .into_iter()
            .filter(move |collection| self.contains(*collection))
    }
}

impl FromIterator<Collection> for CollectionSet {
    fn from_iter<I: IntoIterator<Item = Collection>>(iter: I) -> Self {
        let mut set = Self::empty();
        for collection in iter {
            set.insert(collection);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_table_and_remote_names() {
        assert_eq!("members".parse::<Collection>().unwrap(), Collection::Members);
        assert_eq!("users".parse::<Collection>().unwrap(), Collection::Members);
        assert_eq!(
            "list_items".parse::<Collection>().unwrap(),
            Collection::ListItems
        );
    }

    #[test]
    fn unknown_collection_is_schema_error() {
        let error = "recipes".parse::<Collection>().unwrap_err();
        assert!(matches!(error, Error::Schema(_)));
    }

    #[test]
    fn collection_set_tracks_members() {
        let mut set = CollectionSet::empty();
        assert!(set.is_empty());
        set.insert(Collection::Lists);
        set.insert(Collection::ListItems);
        assert!(set.contains(Collection::Lists));
        assert!(!set.contains(Collection::Members));
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Collection::Lists, Collection::ListItems]
        );
        assert_eq!(CollectionSet::all().iter().count(), 6);
    }
}
