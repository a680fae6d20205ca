// ── In-memory topology store ──
//
// Thread-safe, lock-free storage for every topology entity. Topology
// mutations bump one shared change counter that subscribers watch;
// service-status writes use their own counter so recording a delivery
// outcome never looks like a topology change.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;
use tokio::sync::watch;

use super::collection::EntityCollection;
use super::repository::{
    AddressRepository, FabricRepository, InterfaceRepository, NodeRepository,
    ServiceStatusRepository, SettingsRepository, SnippetRepository, SubnetRepository, Topology,
    VlanRepository,
};
use crate::model::{
    AddressId, DhcpSnippet, Fabric, FabricId, Interface, InterfaceId, IpRange, IpRangeId,
    MacAddress, NetworkSettings, Node, NodeId, ReservedIp, ReservedIpId, ServiceRecord,
    SnippetId, StaticAddress, Subnet, SubnetId, Vlan, VlanId,
};

/// In-memory implementation of [`Topology`].
pub struct DataStore {
    pub(crate) fabrics: EntityCollection<FabricId, Fabric>,
    pub(crate) vlans: EntityCollection<VlanId, Vlan>,
    pub(crate) subnets: EntityCollection<SubnetId, Subnet>,
    pub(crate) ip_ranges: EntityCollection<IpRangeId, IpRange>,
    pub(crate) reserved_ips: EntityCollection<ReservedIpId, ReservedIp>,
    pub(crate) interfaces: EntityCollection<InterfaceId, Interface>,
    pub(crate) addresses: EntityCollection<AddressId, StaticAddress>,
    pub(crate) nodes: EntityCollection<NodeId, Node>,
    pub(crate) snippets: EntityCollection<SnippetId, DhcpSnippet>,
    pub(crate) services: EntityCollection<(NodeId, String), ServiceRecord>,
    settings: ArcSwap<NetworkSettings>,
    next_id: AtomicU64,
    changes: Arc<watch::Sender<u64>>,
    service_changes: Arc<watch::Sender<u64>>,
}

impl DataStore {
    pub fn new() -> Self {
        let changes = Arc::new(watch::channel(0u64).0);
        let service_changes = Arc::new(watch::channel(0u64).0);

        Self {
            fabrics: EntityCollection::new(Arc::clone(&changes)),
            vlans: EntityCollection::new(Arc::clone(&changes)),
            subnets: EntityCollection::new(Arc::clone(&changes)),
            ip_ranges: EntityCollection::new(Arc::clone(&changes)),
            reserved_ips: EntityCollection::new(Arc::clone(&changes)),
            interfaces: EntityCollection::new(Arc::clone(&changes)),
            addresses: EntityCollection::new(Arc::clone(&changes)),
            nodes: EntityCollection::new(Arc::clone(&changes)),
            snippets: EntityCollection::new(Arc::clone(&changes)),
            services: EntityCollection::new(Arc::clone(&service_changes)),
            settings: ArcSwap::from_pointee(NetworkSettings::default()),
            next_id: AtomicU64::new(1),
            changes,
            service_changes,
        }
    }

    /// Receiver that observes every topology mutation.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Receiver that observes service-status writes.
    pub fn subscribe_services(&self) -> watch::Receiver<u64> {
        self.service_changes.subscribe()
    }

    // ── Count accessors ──────────────────────────────────────────────

    pub fn interface_count(&self) -> usize {
        self.interfaces.len()
    }

    pub fn address_count(&self) -> usize {
        self.addresses.len()
    }

    pub fn fabric_count(&self) -> usize {
        self.fabrics.len()
    }

    /// Ensure future ids are above `floor`.
    pub(crate) fn reserve_ids_through(&self, floor: u64) {
        self.next_id.fetch_max(floor.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

// ── Repository implementations ───────────────────────────────────────

impl FabricRepository for DataStore {
    fn fabric(&self, id: FabricId) -> Option<Arc<Fabric>> {
        self.fabrics.get(&id)
    }

    fn fabrics(&self) -> Vec<Arc<Fabric>> {
        self.fabrics.all()
    }

    fn save_fabric(&self, fabric: Fabric) {
        self.fabrics.upsert(fabric.id, fabric);
    }

    fn delete_fabric(&self, id: FabricId) -> Option<Arc<Fabric>> {
        self.fabrics.remove(&id)
    }
}

impl VlanRepository for DataStore {
    fn vlan(&self, id: VlanId) -> Option<Arc<Vlan>> {
        self.vlans.get(&id)
    }

    fn vlans(&self) -> Vec<Arc<Vlan>> {
        self.vlans.all()
    }

    fn vlans_on_fabric(&self, fabric: FabricId) -> Vec<Arc<Vlan>> {
        self.vlans.filter(|v| v.fabric_id == fabric)
    }

    fn vlans_relaying_to(&self, vlan: VlanId) -> Vec<Arc<Vlan>> {
        self.vlans.filter(|v| v.relay_vlan == Some(vlan))
    }

    fn save_vlan(&self, vlan: Vlan) {
        self.vlans.upsert(vlan.id, vlan);
    }

    fn delete_vlan(&self, id: VlanId) -> Option<Arc<Vlan>> {
        self.vlans.remove(&id)
    }
}

impl SubnetRepository for DataStore {
    fn subnet(&self, id: SubnetId) -> Option<Arc<Subnet>> {
        self.subnets.get(&id)
    }

    fn subnets(&self) -> Vec<Arc<Subnet>> {
        self.subnets.all()
    }

    fn subnets_on_vlan(&self, vlan: VlanId) -> Vec<Arc<Subnet>> {
        self.subnets.filter(|s| s.vlan_id == vlan)
    }

    fn save_subnet(&self, subnet: Subnet) {
        self.subnets.upsert(subnet.id, subnet);
    }

    fn delete_subnet(&self, id: SubnetId) -> Option<Arc<Subnet>> {
        self.subnets.remove(&id)
    }

    fn ip_range(&self, id: IpRangeId) -> Option<Arc<IpRange>> {
        self.ip_ranges.get(&id)
    }

    fn ip_ranges_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<IpRange>> {
        self.ip_ranges.filter(|r| r.subnet_id == subnet)
    }

    fn save_ip_range(&self, range: IpRange) {
        self.ip_ranges.upsert(range.id, range);
    }

    fn delete_ip_range(&self, id: IpRangeId) -> Option<Arc<IpRange>> {
        self.ip_ranges.remove(&id)
    }

    fn reserved_ips_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<ReservedIp>> {
        self.reserved_ips.filter(|r| r.subnet_id == subnet)
    }

    fn save_reserved_ip(&self, reserved: ReservedIp) {
        self.reserved_ips.upsert(reserved.id, reserved);
    }

    fn delete_reserved_ip(&self, id: ReservedIpId) -> Option<Arc<ReservedIp>> {
        self.reserved_ips.remove(&id)
    }
}

impl InterfaceRepository for DataStore {
    fn interface(&self, id: InterfaceId) -> Option<Arc<Interface>> {
        self.interfaces.get(&id)
    }

    fn interfaces(&self) -> Vec<Arc<Interface>> {
        self.interfaces.all()
    }

    fn interfaces_on_node(&self, node: NodeId) -> Vec<Arc<Interface>> {
        self.interfaces.filter(|i| i.node_id == Some(node))
    }

    fn interfaces_on_vlan(&self, vlan: VlanId) -> Vec<Arc<Interface>> {
        self.interfaces.filter(|i| i.vlan_id == Some(vlan))
    }

    fn interfaces_with_mac(&self, mac: &MacAddress) -> Vec<Arc<Interface>> {
        self.interfaces.filter(|i| i.mac.as_ref() == Some(mac))
    }

    fn children_of(&self, parent: InterfaceId) -> Vec<Arc<Interface>> {
        self.interfaces.filter(|i| i.parents.contains(&parent))
    }

    fn save_interface(&self, interface: Interface) {
        self.interfaces.upsert(interface.id, interface);
    }

    fn delete_interface(&self, id: InterfaceId) -> Option<Arc<Interface>> {
        self.interfaces.remove(&id)
    }
}

impl AddressRepository for DataStore {
    fn address(&self, id: AddressId) -> Option<Arc<StaticAddress>> {
        self.addresses.get(&id)
    }

    fn addresses_on_interface(&self, interface: InterfaceId) -> Vec<Arc<StaticAddress>> {
        self.addresses.filter(|a| a.interface_id == interface)
    }

    fn addresses_on_subnet(&self, subnet: SubnetId) -> Vec<Arc<StaticAddress>> {
        self.addresses.filter(|a| a.subnet_id == Some(subnet))
    }

    fn addresses_with_ip(&self, ip: IpAddr) -> Vec<Arc<StaticAddress>> {
        self.addresses.filter(|a| a.ip == Some(ip))
    }

    fn save_address(&self, address: StaticAddress) {
        self.addresses.upsert(address.id, address);
    }

    fn delete_address(&self, id: AddressId) -> Option<Arc<StaticAddress>> {
        self.addresses.remove(&id)
    }
}

impl NodeRepository for DataStore {
    fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.get(&id)
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.all()
    }

    fn node_by_system_id(&self, system_id: &str) -> Option<Arc<Node>> {
        self.nodes.find(|n| n.system_id == system_id)
    }

    fn node_by_hostname(&self, hostname: &str) -> Option<Arc<Node>> {
        self.nodes.find(|n| n.hostname == hostname)
    }

    fn save_node(&self, node: Node) {
        self.nodes.upsert(node.id, node);
    }
}

impl SnippetRepository for DataStore {
    fn snippets(&self) -> Vec<Arc<DhcpSnippet>> {
        self.snippets.all()
    }

    fn save_snippet(&self, snippet: DhcpSnippet) {
        self.snippets.upsert(snippet.id, snippet);
    }

    fn delete_snippet(&self, id: SnippetId) -> Option<Arc<DhcpSnippet>> {
        self.snippets.remove(&id)
    }
}

impl ServiceStatusRepository for DataStore {
    fn service(&self, node: NodeId, name: &str) -> Option<Arc<ServiceRecord>> {
        self.services.get(&(node, name.to_owned()))
    }

    fn services_on_node(&self, node: NodeId) -> Vec<Arc<ServiceRecord>> {
        self.services.filter(|s| s.node_id == node)
    }

    fn save_service(&self, record: ServiceRecord) {
        self.services
            .upsert((record.node_id, record.name.clone()), record);
    }
}

impl SettingsRepository for DataStore {
    fn settings(&self) -> Arc<NetworkSettings> {
        self.settings.load_full()
    }

    fn save_settings(&self, settings: NetworkSettings) {
        if *self.settings.load_full() == settings {
            return;
        }
        self.settings.store(Arc::new(settings));
        self.changes.send_modify(|v| *v += 1);
    }
}

impl Topology for DataStore {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{InterfaceKind, NodeKind, ServiceStatus};

    #[test]
    fn ids_are_unique_across_kinds() {
        let store = DataStore::new();
        let a = store.next_id();
        let b = store.next_id();
        assert_ne!(a, b);
        store.reserve_ids_through(100);
        assert_eq!(store.next_id(), 101);
    }

    #[test]
    fn foreign_key_lookups() {
        let store = DataStore::new();
        store.save_node(Node {
            id: NodeId(1),
            system_id: "abc123".into(),
            hostname: "rack1".into(),
            kind: NodeKind::RackController,
            version: None,
        });
        let mut eth0 = Interface::new(InterfaceId(2), NodeId(1), "eth0", InterfaceKind::Physical);
        eth0.mac = Some(MacAddress::parse("00:00:00:00:00:01").unwrap());
        store.save_interface(eth0);
        let mut bond = Interface::new(InterfaceId(3), NodeId(1), "bond0", InterfaceKind::Bond);
        bond.parents = vec![InterfaceId(2)];
        store.save_interface(bond);

        assert_eq!(store.node_by_system_id("abc123").unwrap().hostname, "rack1");
        assert_eq!(store.interfaces_on_node(NodeId(1)).len(), 2);
        assert_eq!(store.children_of(InterfaceId(2))[0].name, "bond0");
        let mac = MacAddress::parse("00:00:00:00:00:01").unwrap();
        assert_eq!(store.interfaces_with_mac(&mac).len(), 1);
    }

    #[test]
    fn service_writes_are_not_topology_changes() {
        let store = DataStore::new();
        let topo = store.subscribe_changes();
        let services = store.subscribe_services();

        store.save_service(ServiceRecord::new(NodeId(1), "dhcpd", ServiceStatus::Running, ""));
        assert_eq!(*topo.borrow(), 0);
        assert_eq!(*services.borrow(), 1);
        assert_eq!(
            store.service(NodeId(1), "dhcpd").unwrap().status,
            ServiceStatus::Running
        );
    }

    #[test]
    fn unchanged_settings_do_not_notify() {
        let store = DataStore::new();
        let rx = store.subscribe_changes();
        store.save_settings(NetworkSettings::default());
        assert_eq!(*rx.borrow(), 0);

        let mut settings = NetworkSettings::default();
        settings.omapi_key = Some("key".into());
        store.save_settings(settings);
        assert_eq!(*rx.borrow(), 1);
    }
}
