//! Location history model

use serde::{Deserialize, Serialize};

use super::{RecordMeta, ServerId};

/// One reported position of a member. Append-only; removed by retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationHistory {
    #[serde(flatten)]
    pub meta: RecordMeta,
    pub user_id: ServerId,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub accuracy: Option<f64>,
    #[serde(default)]
    pub battery_level: Option<f64>,
    /// When the position was recorded (Unix ms)
    pub timestamp: i64,
}
