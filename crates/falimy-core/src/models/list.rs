//! Shared lists and their items

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::{RecordMeta, ServerId};
use crate::Error;

/// Kind of list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    #[default]
    Shopping,
    Todo,
    Packing,
    Custom,
}

impl ListType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shopping => "shopping",
            Self::Todo => "todo",
            Self::Packing => "packing",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shopping" => Ok(Self::Shopping),
            "todo" => Ok(Self::Todo),
            "packing" => Ok(Self::Packing),
            "custom" => Ok(Self::Custom),
            other => Err(Error::InvalidInput(format!("unknown list type: {other}"))),
        }
    }
}

/// Lifecycle of a list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListStatus {
    #[default]
    Active,
    Completed,
    Archived,
}

impl ListStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

impl fmt::Display for ListStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(Error::InvalidInput(format!("unknown list status: {other}"))),
        }
    }
}

/// A shared list (shopping, todo, packing...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct List {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub family_id: ServerId,
    pub name: String,
    #[serde(default)]
    pub list_type: ListType,
    #[serde(default)]
    pub status: ListStatus,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub created_by: Option<ServerId>,
    #[serde(default)]
    pub assigned_to: Option<ServerId>,
}

impl List {
    /// Create a new list pending its first push.
    #[must_use]
    pub fn new(
        family_id: ServerId,
        name: impl Into<String>,
        list_type: ListType,
        created_by: Option<ServerId>,
        now: i64,
    ) -> Self {
        Self {
            meta: RecordMeta::pending(now),
            family_id,
            name: name.into(),
            list_type,
            status: ListStatus::Active,
            sort_order: 0,
            created_by,
            assigned_to: None,
        }
    }
}

/// An entry on a list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListItem {
    #[serde(flatten)]
    pub meta: RecordMeta,
    /// Server id of the owning list
    pub list_id: ServerId,
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub is_checked: bool,
    #[serde(default)]
    pub checked_by: Option<ServerId>,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default)]
    pub created_by: Option<ServerId>,
}

impl ListItem {
    #[must_use]
    pub fn new(
        list_id: ServerId,
        name: impl Into<String>,
        created_by: Option<ServerId>,
        now: i64,
    ) -> Self {
        Self {
            meta: RecordMeta::pending(now),
            list_id,
            name: name.into(),
            quantity: None,
            note: None,
            is_checked: false,
            checked_by: None,
            sort_order: 0,
            created_by,
        }
    }
}
