//! Geofence model

use serde::{Deserialize, Serialize};

use super::{RecordMeta, ServerId};

/// Which boundary crossings fire a geofence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceTrigger {
    Enter,
    Exit,
    #[default]
    Both,
}

/// A circular region that notifies one member about another's movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub family_id: ServerId,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    /// Radius in meters
    pub radius: f64,
    #[serde(default)]
    pub trigger_on: GeofenceTrigger,
    #[serde(default)]
    pub watch_user_id: Option<ServerId>,
    #[serde(default)]
    pub notify_user_id: Option<ServerId>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

const fn enabled_default() -> bool {
    true
}
