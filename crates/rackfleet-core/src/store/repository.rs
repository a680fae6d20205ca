// ── Repository interfaces ──
//
// One narrow trait per entity. Each exposes fetch-by-key,
// fetch-by-foreign-key, save (upsert) and delete; nothing that assumes a
// particular store's query capabilities. Listings are ordered by id.

use std::net::IpAddr;
use std::sync::Arc;

use crate::model::{
    AddressId, DhcpSnippet, Fabric, FabricId, Interface, InterfaceId, IpRange, IpRangeId,
    MacAddress, NetworkSettings, Node, NodeId, ReservedIp, ReservedIpId, ServiceRecord,
    SnippetId, StaticAddress, Subnet, SubnetId, Vlan, VlanId,
};

pub trait FabricRepository {
    fn fabric(&self, id: FabricId) -> Option<Arc<Fabric>>;
    fn fabrics(&self) -> Vec<Arc<Fabric>>;
    fn save_fabric(&self, fabric: Fabric);
    fn delete_fabric(&self, id: FabricId) -> Option<Arc<Fabric>>;
}

pub trait VlanRepository {
    fn vlan(&self, id: VlanId) -> Option<Arc<Vlan>>;
    fn vlans(&self) -> Vec<Arc<Vlan>>;
    fn vlans_on_fabric(&self, fabric: FabricId) -> Vec<Arc<Vlan>>;
    /// VLANs whose DHCP is relayed to `vlan`.
    fn vlans_relaying_to(&self, vlan: VlanId) -> Vec<Arc<Vlan>>;
    fn save_vlan(&self, vlan: Vlan);
    fn delete_vlan(&self, id: VlanId) -> Option<Arc<Vlan>>;
}

pub trait SubnetRepository {
    fn subnet(&self, id: SubnetId) -> Option<Arc<Subnet>>;
    fn subnets(&self) -> Vec<Arc<Subnet>>;
    fn subnets_on_vlan(&self, vlan: VlanId) -> Vec<Arc<Subnet>>;
    fn save_subnet(&self, subnet: Subnet);
    fn delete_subnet(&self, id: SubnetId) -> Option<Arc<Subnet>>;

    fn ip_range(&self, id: IpRangeId) -> Option<Arc<IpRange>>;
    fn ip_ranges_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<IpRange>>;
    fn save_ip_range(&self, range: IpRange);
    fn delete_ip_range(&self, id: IpRangeId) -> Option<Arc<IpRange>>;

    fn reserved_ips_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<ReservedIp>>;
    fn save_reserved_ip(&self, reserved: ReservedIp);
    fn delete_reserved_ip(&self, id: ReservedIpId) -> Option<Arc<ReservedIp>>;
}

pub trait InterfaceRepository {
    fn interface(&self, id: InterfaceId) -> Option<Arc<Interface>>;
    fn interfaces(&self) -> Vec<Arc<Interface>>;
    fn interfaces_on_node(&self, node: NodeId) -> Vec<Arc<Interface>>;
    fn interfaces_on_vlan(&self, vlan: VlanId) -> Vec<Arc<Interface>>;
    fn interfaces_with_mac(&self, mac: &MacAddress) -> Vec<Arc<Interface>>;
    /// Interfaces listing `parent` among their parents.
    fn children_of(&self, parent: InterfaceId) -> Vec<Arc<Interface>>;
    fn save_interface(&self, interface: Interface);
    fn delete_interface(&self, id: InterfaceId) -> Option<Arc<Interface>>;
}

pub trait AddressRepository {
    fn address(&self, id: AddressId) -> Option<Arc<StaticAddress>>;
    fn addresses_on_interface(&self, interface: InterfaceId) -> Vec<Arc<StaticAddress>>;
    fn addresses_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<StaticAddress>>;
    fn addresses_with_ip(&self, ip: IpAddr) -> Vec<Arc<StaticAddress>>;
    fn save_address(&self, address: StaticAddress);
    fn delete_address(&self, id: AddressId) -> Option<Arc<StaticAddress>>;
}

pub trait NodeRepository {
    fn node(&self, id: NodeId) -> Option<Arc<Node>>;
    fn nodes(&self) -> Vec<Arc<Node>>;
    fn node_by_system_id(&self, system_id: &str) -> Option<Arc<Node>>;
    fn node_by_hostname(&self, hostname: &str) -> Option<Arc<Node>>;
    fn save_node(&self, node: Node);
}

pub trait SnippetRepository {
    fn snippets(&self) -> Vec<Arc<DhcpSnippet>>;
    fn save_snippet(&self, snippet: DhcpSnippet);
    fn delete_snippet(&self, id: SnippetId) -> Option<Arc<DhcpSnippet>>;
}

pub trait ServiceStatusRepository {
    fn service(&self, node: NodeId, name: &str) -> Option<Arc<ServiceRecord>>;
    fn services_on_node(&self, node: NodeId) -> Vec<Arc<ServiceRecord>>;
    fn save_service(&self, record: ServiceRecord);
}

pub trait SettingsRepository {
    fn settings(&self) -> Arc<NetworkSettings>;
    fn save_settings(&self, settings: NetworkSettings);
}

/// Everything the core needs from a topology store.
pub trait Topology:
    FabricRepository
    + VlanRepository
    + SubnetRepository
    + InterfaceRepository
    + AddressRepository
    + NodeRepository
    + SnippetRepository
    + ServiceStatusRepository
    + SettingsRepository
    + Send
    + Sync
{
    /// Allocate a fresh id, unique across every entity kind.
    fn next_id(&self) -> u64;
}
