// ── Interfaces ──

use rackfleet_api::interfaces::InterfaceType;
use serde::{Deserialize, Serialize};

use super::ids::{InterfaceId, MacAddress, NodeId, VlanId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InterfaceKind {
    Physical,
    Bond,
    Bridge,
    Vlan,
    /// Observed on the network but not owned by a managed node.
    Unknown,
}

impl InterfaceKind {
    /// Bonds and bridges aggregate their parents under one MAC.
    pub fn is_aggregate(self) -> bool {
        matches!(self, Self::Bond | Self::Bridge)
    }
}

impl From<InterfaceType> for InterfaceKind {
    fn from(reported: InterfaceType) -> Self {
        match reported {
            InterfaceType::Physical => Self::Physical,
            InterfaceType::Bond => Self::Bond,
            InterfaceType::Bridge => Self::Bridge,
            InterfaceType::Vlan => Self::Vlan,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    pub id: InterfaceId,
    /// Owning node; `None` only for `Unknown` interfaces.
    #[serde(default)]
    pub node_id: Option<NodeId>,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: InterfaceKind,
    #[serde(default)]
    pub mac: Option<MacAddress>,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
    #[serde(default)]
    pub vlan_id: Option<VlanId>,
    #[serde(default)]
    pub parents: Vec<InterfaceId>,
    #[serde(default)]
    pub neighbour_discovery: bool,
    #[serde(default)]
    pub mdns_discovery: bool,
}

fn enabled_default() -> bool {
    true
}

impl Interface {
    pub fn new(id: InterfaceId, node_id: NodeId, name: impl Into<String>, kind: InterfaceKind) -> Self {
        Self {
            id,
            node_id: Some(node_id),
            name: name.into(),
            kind,
            mac: None,
            enabled: true,
            vlan_id: None,
            parents: Vec::new(),
            neighbour_discovery: false,
            mdns_discovery: false,
        }
    }

    /// Host-declaration name for the DHCP server.
    pub fn host_label(&self, node_hostname: Option<&str>) -> String {
        let name = self.name.replace('.', "-");
        match node_hostname {
            Some(hostname) if self.node_id.is_some() => format!("{hostname}-{name}"),
            _ => format!("unknown-{}-{name}", self.id),
        }
    }
}
