// ── Rack presence on a VLAN ──
//
// Which rack interface serves a VLAN, and which of the rack's addresses
// represents it there.

use std::cmp::Reverse;
use std::net::IpAddr;
use std::sync::Arc;

use rackfleet_api::IpFamily;

use crate::model::{
    AllocType, Interface, InterfaceKind, IpRangeKind, NodeId, StaticAddress, Vlan,
};
use crate::store::Topology;

fn kind_rank(kind: InterfaceKind) -> u8 {
    match kind {
        InterfaceKind::Bond => 0,
        InterfaceKind::Physical => 1,
        InterfaceKind::Bridge => 2,
        InterfaceKind::Vlan => 3,
        InterfaceKind::Unknown => 4,
    }
}

/// Bond over physical over VLAN-tagged; earlier entries win ties.
pub fn best_interface(interfaces: &[Arc<Interface>]) -> Option<Arc<Interface>> {
    interfaces
        .iter()
        .min_by_key(|iface| kind_rank(iface.kind))
        .cloned()
}

/// Whether `address` is a `family` address on a subnet of `vlan`, or on a
/// subnet of the VLAN that `vlan` relays to.
fn on_vlan_or_relay(
    store: &dyn Topology,
    address: &StaticAddress,
    family: IpFamily,
    vlan: &Vlan,
) -> bool {
    let Some(ip) = address.ip else {
        return false;
    };
    if !family.matches(&ip) {
        return false;
    }
    address
        .subnet_id
        .and_then(|id| store.subnet(id))
        .is_some_and(|subnet| {
            subnet.vlan_id == vlan.id || vlan.relay_vlan == Some(subnet.vlan_id)
        })
}

fn dynamic_range_count(store: &dyn Topology, iface: &Interface) -> usize {
    store
        .addresses_on_interface(iface.id)
        .iter()
        .filter_map(|address| address.subnet_id)
        .map(|subnet| {
            store
                .ip_ranges_on_subnet(subnet)
                .iter()
                .filter(|range| range.kind == IpRangeKind::Dynamic)
                .count()
        })
        .sum()
}

/// Rack interfaces holding a `family` address on `vlan`.
///
/// Interfaces with a sticky or auto address are preferred; discovered
/// addresses only count when no such interface exists. Interfaces whose
/// subnets carry more dynamic ranges come first.
pub fn interfaces_with_ip_on_vlan(
    store: &dyn Topology,
    rack: NodeId,
    vlan: &Vlan,
    family: IpFamily,
) -> Vec<Arc<Interface>> {
    let mut with_static = Vec::new();
    let mut with_discovered = Vec::new();

    for iface in store.interfaces_on_node(rack) {
        for address in store.addresses_on_interface(iface.id) {
            let bucket = match address.alloc_type {
                AllocType::Auto | AllocType::Sticky => &mut with_static,
                AllocType::Discovered => &mut with_discovered,
                AllocType::Dhcp | AllocType::UserReserved => continue,
            };
            if on_vlan_or_relay(store, &address, family, vlan) {
                bucket.push(Arc::clone(&iface));
                break;
            }
        }
    }

    let mut chosen = if with_static.is_empty() {
        with_discovered
    } else {
        with_static
    };
    chosen.sort_by_cached_key(|iface| Reverse(dynamic_range_count(store, iface)));
    chosen
}

/// The rack's own `family` address on `vlan`, taken from its best
/// interface there. Only sticky and auto addresses on a subnet of the VLAN
/// itself qualify.
pub fn rack_address_on_vlan(
    store: &dyn Topology,
    rack: NodeId,
    vlan: &Vlan,
    family: IpFamily,
) -> Option<IpAddr> {
    let qualifying = |address: &StaticAddress| {
        address.is_sticky_or_auto()
            && address.ip.is_some_and(|ip| family.matches(&ip))
            && address
                .subnet_id
                .and_then(|id| store.subnet(id))
                .is_some_and(|subnet| subnet.vlan_id == vlan.id)
    };

    let matching: Vec<Arc<Interface>> = store
        .interfaces_on_node(rack)
        .into_iter()
        .filter(|iface| {
            store
                .addresses_on_interface(iface.id)
                .iter()
                .any(|address| qualifying(address))
        })
        .collect();

    let best = best_interface(&matching)?;
    store
        .addresses_on_interface(best.id)
        .iter()
        .find(|address| qualifying(address))
        .and_then(|address| address.ip)
}
