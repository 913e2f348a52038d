//! Family member model

use serde::{Deserialize, Serialize};

use super::{RecordMeta, ServerId};

/// Role of a member within the family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
    Child,
}

impl MemberRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Member => "member",
            Self::Child => "child",
        }
    }
}

/// How a member shares their location with the family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingMode {
    #[default]
    Off,
    Always,
    Timed,
    OnRequest,
}

/// A member of the family.
///
/// Members are replicated from the server's user collection and never
/// created locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Member {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub family_id: ServerId,
    #[serde(default)]
    pub name: String,
    /// Hidden by the server unless the member made it visible
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: MemberRole,
    #[serde(default)]
    pub location_sharing_mode: SharingMode,
    #[serde(default)]
    pub last_lat: Option<f64>,
    #[serde(default)]
    pub last_lng: Option<f64>,
    /// Time of the last reported location (Unix ms)
    #[serde(default)]
    pub last_location_at: Option<i64>,
}
