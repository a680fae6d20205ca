// ── Failover pairing ──

use rackfleet_api::IpFamily;
use rackfleet_api::dhcp::{FailoverMode, FailoverPeer};
use tracing::error;

use super::rack::rack_address_on_vlan;
use crate::model::{Node, NodeId, Vlan};
use crate::store::Topology;

/// The other rack serving a VLAN, and the failover block for it when both
/// racks have an address of the family there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub peer_rack: NodeId,
    pub peer: Option<FailoverPeer>,
}

pub fn failover_name(vlan: &Vlan) -> String {
    format!("failover-vlan-{}", vlan.id)
}

/// Pairing for `rack` on `vlan`, or `None` when the VLAN has no secondary.
pub fn pairing(store: &dyn Topology, rack: &Node, vlan: &Vlan, family: IpFamily) -> Option<Pairing> {
    let peer_rack = vlan.peer_of(rack.id)?;
    let mode = if vlan.primary_rack == Some(rack.id) {
        FailoverMode::Primary
    } else {
        FailoverMode::Secondary
    };

    let address = rack_address_on_vlan(store, rack.id, vlan, family);
    let peer_address = rack_address_on_vlan(store, peer_rack, vlan, family);
    let peer = match (address, peer_address) {
        (Some(address), Some(peer_address))
            if IpFamily::of(&address) == IpFamily::of(&peer_address) =>
        {
            Some(FailoverPeer {
                name: failover_name(vlan),
                mode,
                address,
                peer_address,
            })
        }
        _ => {
            error!(
                rack = %rack.hostname,
                vlan = %vlan.id,
                %family,
                ?address,
                ?peer_address,
                "no usable {family} address pair for failover; serving without a peer"
            );
            None
        }
    };
    Some(Pairing { peer_rack, peer })
}
