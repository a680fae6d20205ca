// ── Subnet configuration ──

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;

use rackfleet_api::IpFamily;
use rackfleet_api::dhcp::{Pool, SnippetPayload, SubnetConfig};
use tracing::warn;

use super::Synthesis;
use super::failover::Pairing;
use crate::model::{
    AllocType, DhcpSnippet, IpRangeKind, NetworkSettings, NodeId, SnippetScope, SpaceId, Subnet,
    Vlan,
};
use crate::store::Topology;

// ── NTP ─────────────────────────────────────────────────────────────

pub type NtpKey = (Option<SpaceId>, IpFamily);

/// Where NTP servers come from.
#[derive(Debug, Clone)]
pub enum NtpSource {
    /// Operator-configured servers, used verbatim.
    External(Vec<String>),
    /// The asking rack's own addresses, one per space and family.
    Racks(BTreeMap<NtpKey, IpAddr>),
}

impl NtpSource {
    pub fn for_rack(store: &dyn Topology, settings: &NetworkSettings, rack: NodeId) -> Self {
        if settings.ntp_external_only {
            Self::External(settings.ntp_servers.clone())
        } else {
            Self::Racks(rack_ntp_addresses(store, rack))
        }
    }

    fn servers(&self, store: &dyn Topology, vlan: &Vlan, family: IpFamily, peer: Option<NodeId>) -> Vec<String> {
        let own = match self {
            Self::External(servers) => return servers.clone(),
            Self::Racks(own) => own,
        };
        let key = (vlan.space, family);
        let Some(server) = own.get(&key) else {
            return Vec::new();
        };
        let mut servers = vec![server.to_string()];
        if let Some(peer) = peer {
            if let Some(alternate) = rack_ntp_addresses(store, peer).get(&key) {
                servers.push(alternate.to_string());
            }
        }
        servers
    }
}

/// Best NTP address of `rack` per (space, family).
///
/// Candidates are sticky and user-reserved addresses on enabled
/// interfaces. Addresses on VLANs with DHCP enabled win, then the lowest
/// address.
pub fn rack_ntp_addresses(store: &dyn Topology, rack: NodeId) -> BTreeMap<NtpKey, IpAddr> {
    let mut best: BTreeMap<NtpKey, (bool, IpAddr)> = BTreeMap::new();
    for iface in store.interfaces_on_node(rack) {
        if !iface.enabled {
            continue;
        }
        for address in store.addresses_on_interface(iface.id) {
            if !matches!(address.alloc_type, AllocType::Sticky | AllocType::UserReserved) {
                continue;
            }
            let Some(ip) = address.ip else { continue };
            let Some(vlan) = address
                .subnet_id
                .and_then(|id| store.subnet(id))
                .and_then(|subnet| store.vlan(subnet.vlan_id))
            else {
                continue;
            };
            let candidate = (!vlan.dhcp_on, ip);
            best.entry((vlan.space, IpFamily::of(&ip)))
                .and_modify(|current| {
                    if candidate < *current {
                        *current = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }
    best.into_iter().map(|(key, (_, ip))| (key, ip)).collect()
}

// ── DNS ─────────────────────────────────────────────────────────────

/// Addresses of the racks serving `vlan` (or its relay target) on `subnet`.
fn boot_rack_ips(store: &dyn Topology, subnet: &Subnet, vlan: &Vlan) -> Vec<IpAddr> {
    let relay = vlan.relay_vlan.and_then(|id| store.vlan(id));
    let serving = relay.as_deref().unwrap_or(vlan);

    let mut ips = Vec::new();
    for rack in [serving.primary_rack, serving.secondary_rack].into_iter().flatten() {
        for iface in store.interfaces_on_node(rack) {
            for address in store.addresses_on_interface(iface.id) {
                let Some(ip) = address.ip else { continue };
                if address.subnet_id == Some(subnet.id)
                    && address.alloc_type != AllocType::Discovered
                    && address.alloc_type != AllocType::Dhcp
                    && !ips.contains(&ip)
                {
                    ips.push(ip);
                }
            }
        }
    }
    ips
}

/// Resolvers the rack fleet itself offers on `subnet`.
///
/// With rack proxying the serving racks' own addresses lead and the region
/// source address is dropped in favour of them. The region source address
/// always comes last when present and is the fallback when nothing else is.
pub fn default_dns_servers(
    store: &dyn Topology,
    settings: &NetworkSettings,
    subnet: &Subnet,
    vlan: &Vlan,
) -> Vec<IpAddr> {
    if !subnet.allow_dns {
        return Vec::new();
    }
    let family = subnet.family();
    let mut servers: Vec<IpAddr> = settings
        .region_dns
        .iter()
        .copied()
        .filter(|ip| family.matches(ip))
        .collect();
    let region = servers.first().copied();

    if settings.use_rack_proxy {
        let rack_ips = boot_rack_ips(store, subnet, vlan);
        if !servers.is_empty() {
            let rest = servers
                .into_iter()
                .filter(|ip| !rack_ips.contains(ip) && Some(*ip) != region);
            servers = rack_ips.iter().copied().chain(rest).collect();
        } else if !rack_ips.is_empty() {
            servers = rack_ips;
        }
    }

    if let Some(region) = region {
        if servers.contains(&region) {
            servers.retain(|ip| *ip != region);
            servers.push(region);
        }
    }
    if servers.is_empty() {
        if let Some(region) = region {
            warn!(subnet = %subnet.cidr, "no DNS servers found, defaulting to the region address");
            servers.push(region);
        } else {
            warn!(subnet = %subnet.cidr, "no DNS servers found");
        }
    }
    servers
}

fn subnet_dns_servers(
    store: &dyn Topology,
    settings: &NetworkSettings,
    subnet: &Subnet,
    vlan: &Vlan,
) -> Vec<IpAddr> {
    if settings.dns_external_only {
        return settings.upstream_dns.clone();
    }
    let defaults = default_dns_servers(store, settings, subnet, vlan);
    let mut servers: Vec<IpAddr> = if subnet.gateway_ip.is_some() {
        defaults
    } else {
        defaults.into_iter().filter(|ip| subnet.contains(*ip)).collect()
    };
    servers.extend(subnet.dns_servers.iter().copied());
    servers
}

// ── Search list ─────────────────────────────────────────────────────

/// The default domain followed by the other search domains, sorted.
pub fn search_list(settings: &NetworkSettings) -> Vec<String> {
    let mut others: Vec<String> = settings
        .search_domains
        .iter()
        .filter(|domain| **domain != settings.default_domain)
        .cloned()
        .collect();
    others.sort();
    others.dedup();

    let mut list = vec![settings.default_domain.clone()];
    list.extend(others);
    list
}

// ── Assembly ────────────────────────────────────────────────────────

fn payloads<'a>(snippets: impl Iterator<Item = &'a Arc<DhcpSnippet>>) -> Vec<SnippetPayload> {
    snippets.map(|snippet| snippet.to_payload()).collect()
}

impl Synthesis<'_> {
    /// Dynamic ranges of `subnet` in id order, each with its range snippets.
    fn pools(&self, subnet: &Subnet, failover: Option<&str>) -> Vec<Pool> {
        let mut ranges = self.store.ip_ranges_on_subnet(subnet.id);
        ranges.retain(|range| range.kind == IpRangeKind::Dynamic);
        ranges.sort_by_key(|range| range.id);

        ranges
            .iter()
            .map(|range| Pool {
                ip_range_low: range.start_ip,
                ip_range_high: range.end_ip,
                failover_peer: failover.map(str::to_owned),
                dhcp_snippets: payloads(self.snippets.iter().filter(|snippet| {
                    snippet.scope
                        == SnippetScope::Subnet {
                            subnet_id: subnet.id,
                            iprange_id: Some(range.id),
                        }
                })),
            })
            .collect()
    }

    pub(super) fn subnet_config(&self, subnet: &Subnet, vlan: &Vlan, pairing: Option<&Pairing>) -> SubnetConfig {
        let failover = pairing
            .and_then(|pairing| pairing.peer.as_ref())
            .map(|peer| peer.name.as_str());
        let peer_rack = pairing.map(|pairing| pairing.peer_rack);

        SubnetConfig {
            subnet: subnet.network(),
            subnet_mask: subnet.netmask(),
            subnet_cidr: subnet.cidr.to_string(),
            broadcast_ip: subnet.broadcast(),
            router_ip: subnet
                .gateway_ip
                .map(|gateway| gateway.to_string())
                .unwrap_or_default(),
            dns_servers: subnet_dns_servers(self.store, &self.settings, subnet, vlan),
            ntp_servers: self.ntp.servers(self.store, vlan, subnet.family(), peer_rack),
            domain_name: self.settings.default_domain.clone(),
            search_list: self.search_list.clone(),
            pools: self.pools(subnet, failover),
            dhcp_snippets: payloads(self.snippets.iter().filter(|snippet| {
                snippet.scope
                    == SnippetScope::Subnet {
                        subnet_id: subnet.id,
                        iprange_id: None,
                    }
            })),
            disabled_boot_architectures: subnet.disabled_boot_architectures.clone(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        AddressId, FabricId, Interface, InterfaceId, InterfaceKind, StaticAddress, SubnetId,
        VlanId,
    };
    use crate::store::{
        AddressRepository, DataStore, InterfaceRepository, SubnetRepository, VlanRepository,
    };

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    /// Rack 1 is primary on VLAN 10 and holds 10.0.0.2 on subnet 20.
    fn store_with_rack() -> (DataStore, Vlan, Subnet) {
        let store = DataStore::new();
        let mut vlan = Vlan::new(VlanId(10), FabricId(1), 0);
        vlan.dhcp_on = true;
        vlan.primary_rack = Some(NodeId(1));
        store.save_vlan(vlan.clone());

        let mut subnet = Subnet::new(SubnetId(20), vlan.id, "10.0.0.0/24".parse().unwrap());
        subnet.gateway_ip = Some(ip("10.0.0.1"));
        store.save_subnet(subnet.clone());

        let mut iface = Interface::new(InterfaceId(30), NodeId(1), "eth0", InterfaceKind::Physical);
        iface.vlan_id = Some(vlan.id);
        store.save_interface(iface);

        let mut address = StaticAddress::new(AddressId(40), InterfaceId(30), AllocType::Sticky);
        address.ip = Some(ip("10.0.0.2"));
        address.subnet_id = Some(subnet.id);
        store.save_address(address);
        (store, vlan, subnet)
    }

    #[test]
    fn rack_proxy_leads_and_drops_region_source() {
        let (store, vlan, subnet) = store_with_rack();
        let settings = NetworkSettings {
            region_dns: vec![ip("10.9.9.9"), ip("10.9.9.8"), ip("fd00::53")],
            ..NetworkSettings::default()
        };
        assert_eq!(
            default_dns_servers(&store, &settings, &subnet, &vlan),
            vec![ip("10.0.0.2"), ip("10.9.9.8")]
        );
    }

    #[test]
    fn region_source_moves_last_without_proxy() {
        let (store, vlan, subnet) = store_with_rack();
        let settings = NetworkSettings {
            region_dns: vec![ip("10.9.9.9"), ip("10.9.9.8")],
            use_rack_proxy: false,
            ..NetworkSettings::default()
        };
        assert_eq!(
            default_dns_servers(&store, &settings, &subnet, &vlan),
            vec![ip("10.9.9.8"), ip("10.9.9.9")]
        );
    }

    #[test]
    fn disallowed_dns_keeps_only_explicit_servers() {
        let (store, vlan, mut subnet) = store_with_rack();
        subnet.allow_dns = false;
        subnet.dns_servers = vec![ip("1.1.1.1")];
        let settings = NetworkSettings {
            region_dns: vec![ip("10.9.9.9")],
            ..NetworkSettings::default()
        };
        assert_eq!(
            subnet_dns_servers(&store, &settings, &subnet, &vlan),
            vec![ip("1.1.1.1")]
        );
    }

    #[test]
    fn gatewayless_subnet_keeps_in_subnet_defaults() {
        let (store, vlan, mut subnet) = store_with_rack();
        subnet.gateway_ip = None;
        let settings = NetworkSettings {
            region_dns: vec![ip("10.9.9.9"), ip("10.9.9.8")],
            ..NetworkSettings::default()
        };
        assert_eq!(
            subnet_dns_servers(&store, &settings, &subnet, &vlan),
            vec![ip("10.0.0.2")]
        );
    }

    #[test]
    fn external_only_dns_overrides_everything() {
        let (store, vlan, mut subnet) = store_with_rack();
        subnet.dns_servers = vec![ip("1.1.1.1")];
        let settings = NetworkSettings {
            dns_external_only: true,
            upstream_dns: vec![ip("8.8.8.8"), ip("2001:4860::8888")],
            region_dns: vec![ip("10.9.9.9")],
            ..NetworkSettings::default()
        };
        assert_eq!(
            subnet_dns_servers(&store, &settings, &subnet, &vlan),
            vec![ip("8.8.8.8"), ip("2001:4860::8888")]
        );
    }

    #[test]
    fn ntp_prefers_dhcp_vlan_then_lowest_address() {
        let (store, vlan, _) = store_with_rack();

        let quiet = Vlan::new(VlanId(11), FabricId(1), 5);
        store.save_vlan(quiet.clone());
        let other = Subnet::new(SubnetId(21), quiet.id, "9.0.0.0/24".parse().unwrap());
        store.save_subnet(other.clone());
        let mut eth1 = Interface::new(InterfaceId(31), NodeId(1), "eth1", InterfaceKind::Physical);
        eth1.vlan_id = Some(quiet.id);
        store.save_interface(eth1);
        let mut low = StaticAddress::new(AddressId(41), InterfaceId(31), AllocType::Sticky);
        low.ip = Some(ip("9.0.0.1"));
        low.subnet_id = Some(other.id);
        store.save_address(low);

        let chosen = rack_ntp_addresses(&store, NodeId(1));
        assert_eq!(chosen.get(&(None, IpFamily::V4)), Some(&ip("10.0.0.2")));
        assert_eq!(chosen.get(&(None, IpFamily::V6)), None);

        let mut dhcp_off = (*store.vlan(vlan.id).unwrap()).clone();
        dhcp_off.dhcp_on = false;
        store.save_vlan(dhcp_off);
        let chosen = rack_ntp_addresses(&store, NodeId(1));
        assert_eq!(chosen.get(&(None, IpFamily::V4)), Some(&ip("9.0.0.1")));
    }

    #[test]
    fn search_list_leads_with_default_domain() {
        let settings = NetworkSettings {
            default_domain: "maas".into(),
            search_domains: vec!["zeta.example".into(), "maas".into(), "alpha.example".into()],
            ..NetworkSettings::default()
        };
        assert_eq!(
            search_list(&settings),
            vec!["maas", "alpha.example", "zeta.example"]
        );
    }
}
