//! Per-rack DHCP configuration.
//!
//! [`dhcp_configuration`] turns the topology into the two payloads a rack
//! controller's DHCP servers consume, one per address family. Each VLAN
//! the rack serves becomes a shared network holding its managed subnets;
//! VLANs that relay to a served VLAN ride along with it.
//!
//! Synthesis only reads the store, apart from persisting a freshly
//! generated OMAPI key the first time one is needed.

mod failover;
mod hosts;
mod rack;
mod subnet_config;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rackfleet_api::IpFamily;
use rackfleet_api::dhcp::{
    DhcpConfig, FailoverPeer, HostReservation, InterfaceName, SharedNetwork, SubnetConfig,
};
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info};

pub use failover::{Pairing, failover_name};
pub use hosts::hosts_for_subnets;
pub use rack::{best_interface, interfaces_with_ip_on_vlan, rack_address_on_vlan};
pub use subnet_config::{NtpSource, default_dns_servers, rack_ntp_addresses, search_list};

use crate::error::CoreError;
use crate::model::{DhcpSnippet, NetworkSettings, Node, NodeId, SnippetScope, Subnet, Vlan, VlanId};
use crate::store::Topology;

const OMAPI_KEY_BYTES: usize = 64;

/// Both family payloads for one rack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RackDhcpConfiguration {
    pub v4: DhcpConfig,
    pub v6: DhcpConfig,
}

impl RackDhcpConfiguration {
    pub fn family(&self, family: IpFamily) -> &DhcpConfig {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }
}

/// Inputs shared by every VLAN and subnet of one synthesis run.
struct Synthesis<'a> {
    store: &'a dyn Topology,
    rack: Arc<Node>,
    settings: Arc<NetworkSettings>,
    snippets: Vec<Arc<DhcpSnippet>>,
    ntp: NtpSource,
    search_list: Vec<String>,
}

/// What one VLAN contributes to a family payload.
struct VlanConfig {
    failover: Option<FailoverPeer>,
    subnets: Vec<SubnetConfig>,
    hosts: Vec<HostReservation>,
    interface: Option<String>,
}

/// Configuration for the DHCP servers on `rack`.
///
/// `test_snippet` stands in for the stored snippet with the same id (or
/// is added when new), so an edit can be validated before it is saved.
pub fn dhcp_configuration(
    store: &dyn Topology,
    rack: NodeId,
    test_snippet: Option<&DhcpSnippet>,
) -> Result<RackDhcpConfiguration, CoreError> {
    let rack = store
        .node(rack)
        .ok_or_else(|| CoreError::not_found("rack controller", rack))?;
    if !rack.kind.is_rack() {
        return Err(CoreError::validation(format!(
            "{} is a {}, not a rack controller",
            rack.hostname, rack.kind
        )));
    }

    let omapi_key = ensure_omapi_key(store);
    let settings = store.settings();
    let synthesis = Synthesis {
        store,
        ntp: NtpSource::for_rack(store, &settings, rack.id),
        search_list: search_list(&settings),
        snippets: enabled_snippets(store, test_snippet),
        settings,
        rack,
    };

    let vlans = managed_vlans(store, synthesis.rack.id);
    debug!(rack = %synthesis.rack.hostname, vlans = vlans.len(), "synthesizing DHCP configuration");

    let [v4, v6] = IpFamily::ALL.map(|family| synthesis.family_config(&vlans, family, &omapi_key));
    Ok(RackDhcpConfiguration { v4, v6 })
}

/// The stored OMAPI key, generated and saved on first use.
fn ensure_omapi_key(store: &dyn Topology) -> String {
    let settings = store.settings();
    if let Some(key) = settings.omapi_key.as_ref().filter(|key| !key.is_empty()) {
        return key.clone();
    }

    let mut raw = [0u8; OMAPI_KEY_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    let key = STANDARD.encode(raw);

    let mut updated = (*settings).clone();
    updated.omapi_key = Some(key.clone());
    store.save_settings(updated);
    info!("generated OMAPI key");
    key
}

/// Enabled snippets, with `test` swapped in for its stored version.
fn enabled_snippets(store: &dyn Topology, test: Option<&DhcpSnippet>) -> Vec<Arc<DhcpSnippet>> {
    let mut snippets: Vec<Arc<DhcpSnippet>> = store
        .snippets()
        .into_iter()
        .filter(|snippet| snippet.enabled)
        .collect();
    if let Some(test) = test {
        let test = Arc::new(test.clone());
        match snippets.iter_mut().find(|snippet| snippet.id == test.id) {
            Some(slot) => *slot = test,
            None => snippets.push(test),
        }
    }
    snippets
}

/// VLANs `rack` serves DHCP on through one of its own interfaces, plus
/// every VLAN relaying to one of them.
pub fn managed_vlans(store: &dyn Topology, rack: NodeId) -> Vec<Arc<Vlan>> {
    let mut vlans: BTreeMap<VlanId, Arc<Vlan>> = BTreeMap::new();
    let served: BTreeSet<VlanId> = store
        .interfaces_on_node(rack)
        .iter()
        .filter_map(|iface| iface.vlan_id)
        .collect();
    for vlan in served.into_iter().filter_map(|id| store.vlan(id)) {
        if !vlan.is_served_by(rack) {
            continue;
        }
        for relayed in store.vlans_relaying_to(vlan.id) {
            vlans.insert(relayed.id, relayed);
        }
        vlans.insert(vlan.id, vlan);
    }
    vlans.into_values().collect()
}

/// Racks that need a fresh configuration when `subnet` changes: those
/// with an address on it, and those serving the VLAN it relays to.
pub fn racks_for_subnet(store: &dyn Topology, subnet: &Subnet) -> BTreeSet<NodeId> {
    let mut racks: BTreeSet<NodeId> = store
        .addresses_on_subnet(subnet.id)
        .iter()
        .filter_map(|address| store.interface(address.interface_id))
        .filter_map(|iface| iface.node_id)
        .filter(|node| store.node(*node).is_some_and(|node| node.kind.is_rack()))
        .collect();
    if let Some(relay) = store
        .vlan(subnet.vlan_id)
        .and_then(|vlan| vlan.relay_vlan)
        .and_then(|id| store.vlan(id))
    {
        racks.extend(relay.primary_rack);
        racks.extend(relay.secondary_rack);
    }
    racks
}

impl Synthesis<'_> {
    fn family_config(&self, vlans: &[Arc<Vlan>], family: IpFamily, omapi_key: &str) -> DhcpConfig {
        let mut failover_peers = Vec::new();
        let mut shared_networks = Vec::new();
        let mut hosts = Vec::new();
        let mut interfaces = BTreeSet::new();

        for vlan in vlans {
            let subnets: Vec<Arc<Subnet>> = self
                .store
                .subnets_on_vlan(vlan.id)
                .into_iter()
                .filter(|subnet| subnet.managed && subnet.family() == family)
                .collect();
            if subnets.is_empty() {
                continue;
            }

            let config = self.vlan_config(vlan, &subnets, family);
            failover_peers.extend(config.failover);
            hosts.extend(config.hosts);
            interfaces.extend(config.interface.clone());
            shared_networks.push(SharedNetwork {
                name: format!("vlan-{}", vlan.id),
                mtu: vlan.mtu,
                subnets: config.subnets,
                interface: config.interface,
            });
        }

        if interfaces.is_empty() && !shared_networks.is_empty() {
            info!(
                rack = %self.rack.hostname,
                %family,
                "no interface to serve on; leaving the {family} server unconfigured"
            );
            shared_networks.clear();
        }

        DhcpConfig {
            omapi_key: omapi_key.to_owned(),
            failover_peers,
            shared_networks,
            hosts,
            interfaces: interfaces
                .into_iter()
                .map(|name| InterfaceName { name })
                .collect(),
            global_dhcp_snippets: self
                .snippets
                .iter()
                .filter(|snippet| snippet.scope == SnippetScope::Global)
                .map(|snippet| snippet.to_payload())
                .collect(),
        }
    }

    fn vlan_config(&self, vlan: &Vlan, subnets: &[Arc<Subnet>], family: IpFamily) -> VlanConfig {
        let candidates = interfaces_with_ip_on_vlan(self.store, self.rack.id, vlan, family);
        let interface = best_interface(&candidates).map(|iface| iface.name.clone());
        let pairing = failover::pairing(self.store, &self.rack, vlan, family);

        let mut configs: Vec<SubnetConfig> = subnets
            .iter()
            .map(|subnet| self.subnet_config(subnet, vlan, pairing.as_ref()))
            .collect();
        configs.sort_by_key(|config| config.subnet);

        VlanConfig {
            failover: pairing.and_then(|pairing| pairing.peer),
            subnets: configs,
            hosts: hosts_for_subnets(self.store, subnets, &self.snippets),
            interface,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{
        AddressId, AllocType, FabricId, Interface, InterfaceId, InterfaceKind, NodeKind, SnippetId,
        StaticAddress, SubnetId,
    };
    use crate::store::{
        AddressRepository, DataStore, InterfaceRepository, NodeRepository, SettingsRepository,
        SnippetRepository, SubnetRepository, VlanRepository,
    };

    fn rack(store: &DataStore, id: u64, hostname: &str) {
        store.save_node(Node {
            id: NodeId(id),
            system_id: format!("sys-{id}"),
            hostname: hostname.into(),
            kind: NodeKind::RackController,
            version: None,
        });
    }

    fn served_vlan(store: &DataStore) -> Vlan {
        rack(store, 1, "rack1");
        let mut vlan = Vlan::new(VlanId(10), FabricId(2), 0);
        vlan.dhcp_on = true;
        vlan.primary_rack = Some(NodeId(1));
        store.save_vlan(vlan.clone());

        let mut iface = Interface::new(InterfaceId(30), NodeId(1), "eth0", InterfaceKind::Physical);
        iface.vlan_id = Some(vlan.id);
        store.save_interface(iface);

        let subnet = Subnet::new(SubnetId(20), vlan.id, "10.0.0.0/24".parse().unwrap());
        store.save_subnet(subnet);
        let mut address = StaticAddress::new(AddressId(40), InterfaceId(30), AllocType::Sticky);
        address.ip = Some("10.0.0.2".parse().unwrap());
        address.subnet_id = Some(SubnetId(20));
        store.save_address(address);
        vlan
    }

    #[test]
    fn unknown_or_non_rack_node_is_rejected() {
        let store = DataStore::new();
        assert!(matches!(
            dhcp_configuration(&store, NodeId(99), None),
            Err(CoreError::NotFound { .. })
        ));

        store.save_node(Node {
            id: NodeId(5),
            system_id: "m".into(),
            hostname: "machine".into(),
            kind: NodeKind::Machine,
            version: None,
        });
        assert!(matches!(
            dhcp_configuration(&store, NodeId(5), None),
            Err(CoreError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn omapi_key_is_generated_once() {
        let store = DataStore::new();
        served_vlan(&store);

        let first = dhcp_configuration(&store, NodeId(1), None).unwrap();
        let second = dhcp_configuration(&store, NodeId(1), None).unwrap();
        assert!(!first.v4.omapi_key.is_empty());
        assert_eq!(first.v4.omapi_key, second.v6.omapi_key);
        assert_eq!(store.settings().omapi_key.as_deref(), Some(first.v4.omapi_key.as_str()));
    }

    #[test]
    fn families_do_not_mix() {
        let store = DataStore::new();
        served_vlan(&store);

        let config = dhcp_configuration(&store, NodeId(1), None).unwrap();
        assert_eq!(config.v4.shared_networks.len(), 1);
        assert_eq!(config.v4.shared_networks[0].name, "vlan-10");
        assert_eq!(config.v4.shared_networks[0].interface.as_deref(), Some("eth0"));
        assert_eq!(config.v4.interfaces, vec![InterfaceName { name: "eth0".into() }]);
        assert!(config.v6.is_empty());
        assert!(config.v6.interfaces.is_empty());
    }

    #[test]
    fn relayed_vlans_are_managed() {
        let store = DataStore::new();
        let vlan = served_vlan(&store);
        let mut relayed = Vlan::new(VlanId(11), FabricId(3), 0);
        relayed.relay_vlan = Some(vlan.id);
        store.save_vlan(relayed);
        store.save_vlan(Vlan::new(VlanId(12), FabricId(4), 0));

        let ids: Vec<VlanId> = managed_vlans(&store, NodeId(1)).iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![VlanId(10), VlanId(11)]);
    }

    #[test]
    fn unmanaged_subnets_are_skipped() {
        let store = DataStore::new();
        served_vlan(&store);
        let mut subnet = (*store.subnet(SubnetId(20)).unwrap()).clone();
        subnet.managed = false;
        store.save_subnet(subnet);

        let config = dhcp_configuration(&store, NodeId(1), None).unwrap();
        assert!(config.v4.is_empty());
    }

    #[test]
    fn test_snippet_replaces_stored_one() {
        let store = DataStore::new();
        served_vlan(&store);
        let stored = DhcpSnippet {
            id: SnippetId(50),
            name: "opts".into(),
            description: String::new(),
            value: "option a 1;".into(),
            enabled: true,
            scope: SnippetScope::Global,
        };
        store.save_snippet(stored.clone());

        let edited = DhcpSnippet {
            value: "option a 2;".into(),
            ..stored
        };
        let config = dhcp_configuration(&store, NodeId(1), Some(&edited)).unwrap();
        assert_eq!(config.v4.global_dhcp_snippets.len(), 1);
        assert_eq!(config.v4.global_dhcp_snippets[0].value, "option a 2;");
    }

    #[test]
    fn racks_for_subnet_includes_relay_servers() {
        let store = DataStore::new();
        let vlan = served_vlan(&store);
        let mut relayed = Vlan::new(VlanId(11), FabricId(3), 0);
        relayed.relay_vlan = Some(vlan.id);
        store.save_vlan(relayed);
        let remote = Subnet::new(SubnetId(21), VlanId(11), "10.1.0.0/24".parse().unwrap());
        store.save_subnet(remote.clone());

        let local = store.subnet(SubnetId(20)).unwrap();
        assert_eq!(racks_for_subnet(&store, &local), BTreeSet::from([NodeId(1)]));
        assert_eq!(racks_for_subnet(&store, &remote), BTreeSet::from([NodeId(1)]));
    }
}
