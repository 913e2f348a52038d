//! Family model

use serde::{Deserialize, Serialize};

use super::{RecordMeta, ServerId};

/// A family: the unit of data sharing. Every other entity is scoped to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Family {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub name: String,
    /// Code other members use to join
    #[serde(default)]
    pub invite_code: String,
    #[serde(default)]
    pub created_by: Option<ServerId>,
}
