// ── Service status records ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::NodeId;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ServiceStatus {
    #[default]
    Unknown,
    Running,
    Off,
    Dead,
}

/// Health of one service on one controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub node_id: NodeId,
    pub name: String,
    pub status: ServiceStatus,
    #[serde(default)]
    pub status_info: String,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRecord {
    pub fn new(
        node_id: NodeId,
        name: impl Into<String>,
        status: ServiceStatus,
        status_info: impl Into<String>,
    ) -> Self {
        Self {
            node_id,
            name: name.into(),
            status,
            status_info: status_info.into(),
            updated_at: Utc::now(),
        }
    }
}
