// ── Fabrics and VLANs ──

use serde::{Deserialize, Serialize};

use super::ids::{FabricId, NodeId, SpaceId, VlanId};
use crate::error::CoreError;

/// Untagged VLAN present on every fabric.
pub const DEFAULT_VID: u16 = 0;
pub const MAX_VID: u16 = 4094;
pub const DEFAULT_MTU: u32 = 1500;

/// An isolated broadcast domain grouping one or more VLANs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fabric {
    pub id: FabricId,
    #[serde(default)]
    pub name: Option<String>,
}

impl Fabric {
    pub fn new(id: FabricId) -> Self {
        Self { id, name: None }
    }
}

/// A tagged or untagged segment within a fabric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: VlanId,
    pub fabric_id: FabricId,
    pub vid: u16,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub dhcp_on: bool,
    #[serde(default)]
    pub primary_rack: Option<NodeId>,
    #[serde(default)]
    pub secondary_rack: Option<NodeId>,
    /// DHCP for this VLAN is relayed to the failover pair of another VLAN.
    #[serde(default)]
    pub relay_vlan: Option<VlanId>,
    #[serde(default)]
    pub space: Option<SpaceId>,
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

impl Vlan {
    pub fn new(id: VlanId, fabric_id: FabricId, vid: u16) -> Self {
        Self {
            id,
            fabric_id,
            vid,
            name: None,
            mtu: DEFAULT_MTU,
            dhcp_on: false,
            primary_rack: None,
            secondary_rack: None,
            relay_vlan: None,
            space: None,
        }
    }

    /// Whether `rack` serves DHCP for this VLAN directly.
    pub fn is_served_by(&self, rack: NodeId) -> bool {
        self.dhcp_on && (self.primary_rack == Some(rack) || self.secondary_rack == Some(rack))
    }

    /// The other rack of the failover pair, from `rack`'s point of view.
    pub fn peer_of(&self, rack: NodeId) -> Option<NodeId> {
        let secondary = self.secondary_rack?;
        if self.primary_rack == Some(rack) {
            Some(secondary)
        } else {
            self.primary_rack
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.vid > MAX_VID {
            return Err(CoreError::validation(format!(
                "VLAN {}: vid {} is outside 0-{MAX_VID}",
                self.id, self.vid
            )));
        }
        if self.secondary_rack.is_some() && self.primary_rack.is_none() {
            return Err(CoreError::validation(format!(
                "VLAN {}: a secondary rack requires a primary rack",
                self.id
            )));
        }
        if self.secondary_rack.is_some() && self.secondary_rack == self.primary_rack {
            return Err(CoreError::validation(format!(
                "VLAN {}: primary and secondary rack must differ",
                self.id
            )));
        }
        if self.relay_vlan == Some(self.id) {
            return Err(CoreError::validation(format!(
                "VLAN {}: cannot relay to itself",
                self.id
            )));
        }
        Ok(())
    }
}
