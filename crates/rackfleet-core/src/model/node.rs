// ── Nodes ──

use serde::{Deserialize, Serialize};

use super::ids::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeKind {
    Machine,
    Device,
    RackController,
    RegionController,
    RegionAndRackController,
}

impl NodeKind {
    pub fn is_rack(self) -> bool {
        matches!(self, Self::RackController | Self::RegionAndRackController)
    }
}

/// A machine or controller owning interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub system_id: String,
    pub hostname: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Version string reported at registration (controllers only).
    #[serde(default)]
    pub version: Option<String>,
}
