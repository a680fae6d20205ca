// ── Host reservations ──

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use rackfleet_api::dhcp::{HostReservation, SnippetPayload};

use crate::model::{DhcpSnippet, Interface, InterfaceId, NodeId, SnippetScope, Subnet};
use crate::store::Topology;

fn node_snippets(snippets: &[Arc<DhcpSnippet>], node: Option<NodeId>) -> Vec<SnippetPayload> {
    let Some(node) = node else {
        return Vec::new();
    };
    snippets
        .iter()
        .filter(|snippet| snippet.scope == SnippetScope::Node { node_id: node })
        .map(|snippet| snippet.to_payload())
        .collect()
}

fn host_entry(
    store: &dyn Topology,
    iface: &Interface,
    ip: IpAddr,
    snippets: &[Arc<DhcpSnippet>],
) -> Option<HostReservation> {
    let mac = iface.mac.as_ref()?;
    let hostname = iface
        .node_id
        .and_then(|node| store.node(node))
        .map(|node| node.hostname.clone());
    Some(HostReservation {
        host: iface.host_label(hostname.as_deref()),
        mac: mac.to_string(),
        ip,
        dhcp_snippets: node_snippets(snippets, iface.node_id),
    })
}

/// Fixed leases for `subnets`.
///
/// Every interface holding a sticky, auto or user-reserved address gets one
/// entry, for its lowest-id address. Members of a bond or bridge whose MAC
/// differs from the aggregate's get their own copy ahead of it, since the
/// client may DHCP from any of them. Operator reservations follow unless
/// their MAC is already reserved.
pub fn hosts_for_subnets(
    store: &dyn Topology,
    subnets: &[Arc<Subnet>],
    snippets: &[Arc<DhcpSnippet>],
) -> Vec<HostReservation> {
    let mut addresses: Vec<_> = subnets
        .iter()
        .flat_map(|subnet| store.addresses_on_subnet(subnet.id))
        .filter(|address| address.is_reservable())
        .collect();
    addresses.sort_by_key(|address| address.id);

    let mut seen: BTreeSet<InterfaceId> = BTreeSet::new();
    let mut hosts = Vec::new();
    for address in addresses {
        let (Some(ip), Some(iface)) = (address.ip, store.interface(address.interface_id)) else {
            continue;
        };
        if !seen.insert(iface.id) {
            continue;
        }
        if iface.kind.is_aggregate() {
            for parent in iface.parents.iter().filter_map(|id| store.interface(*id)) {
                if parent.mac != iface.mac && seen.insert(parent.id) {
                    hosts.extend(host_entry(store, &parent, ip, snippets));
                }
            }
        }
        hosts.extend(host_entry(store, &iface, ip, snippets));
    }

    let mut known_macs: BTreeSet<String> = hosts.iter().map(|host| host.mac.clone()).collect();
    for subnet in subnets {
        for reserved in store.reserved_ips_on_subnet(subnet.id) {
            let mac = reserved.mac.to_string();
            if known_macs.insert(mac.clone()) {
                hosts.push(HostReservation {
                    host: String::new(),
                    mac,
                    ip: reserved.ip,
                    dhcp_snippets: Vec::new(),
                });
            }
        }
    }
    hosts
}
