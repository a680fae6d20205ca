// ── Serializable topology snapshot ──
//
// Offline form of a whole store: used by the `reconcile` and
// `dhcp-config` commands and by tests to seed a `DataStore`.

use serde::{Deserialize, Serialize};

use super::data_store::DataStore;
use super::repository::{
    AddressRepository, FabricRepository, InterfaceRepository, NodeRepository,
    ServiceStatusRepository, SettingsRepository, SnippetRepository, SubnetRepository,
    VlanRepository,
};
use crate::error::CoreError;
use crate::model::{
    DhcpSnippet, Fabric, Interface, IpRange, NetworkSettings, Node, ReservedIp, ServiceRecord,
    StaticAddress, Subnet, Vlan,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySnapshot {
    pub settings: NetworkSettings,
    pub fabrics: Vec<Fabric>,
    pub vlans: Vec<Vlan>,
    pub subnets: Vec<Subnet>,
    pub ip_ranges: Vec<IpRange>,
    pub reserved_ips: Vec<ReservedIp>,
    pub nodes: Vec<Node>,
    pub interfaces: Vec<Interface>,
    pub addresses: Vec<StaticAddress>,
    pub snippets: Vec<DhcpSnippet>,
    pub services: Vec<ServiceRecord>,
}

impl TopologySnapshot {
    /// Capture the current state of `store`.
    pub fn capture(store: &DataStore) -> Self {
        fn owned<T: Clone>(items: Vec<std::sync::Arc<T>>) -> Vec<T> {
            items.iter().map(|item| (**item).clone()).collect()
        }

        Self {
            settings: (*store.settings()).clone(),
            fabrics: owned(store.fabrics()),
            vlans: owned(store.vlans()),
            subnets: owned(store.subnets()),
            ip_ranges: owned(store.ip_ranges.all()),
            reserved_ips: owned(store.reserved_ips.all()),
            nodes: owned(store.nodes()),
            interfaces: owned(store.interfaces()),
            addresses: owned(store.addresses.all()),
            snippets: owned(store.snippets()),
            services: owned(store.services.all()),
        }
    }

    /// Build a store from this snapshot, validating every entity first.
    pub fn into_store(self) -> Result<DataStore, CoreError> {
        self.validate()?;

        let store = DataStore::new();
        let mut max_id = 0u64;

        for fabric in self.fabrics {
            max_id = max_id.max(fabric.id.get());
            store.save_fabric(fabric);
        }
        for vlan in self.vlans {
            max_id = max_id.max(vlan.id.get());
            store.save_vlan(vlan);
        }
        for subnet in self.subnets {
            max_id = max_id.max(subnet.id.get());
            store.save_subnet(subnet);
        }
        for range in self.ip_ranges {
            max_id = max_id.max(range.id.get());
            store.save_ip_range(range);
        }
        for reserved in self.reserved_ips {
            max_id = max_id.max(reserved.id.get());
            store.save_reserved_ip(reserved);
        }
        for node in self.nodes {
            max_id = max_id.max(node.id.get());
            store.save_node(node);
        }
        for interface in self.interfaces {
            max_id = max_id.max(interface.id.get());
            store.save_interface(interface);
        }
        for address in self.addresses {
            max_id = max_id.max(address.id.get());
            store.save_address(address);
        }
        for snippet in self.snippets {
            max_id = max_id.max(snippet.id.get());
            store.save_snippet(snippet);
        }
        for record in self.services {
            store.save_service(record);
        }
        store.save_settings(self.settings);
        store.reserve_ids_through(max_id);

        Ok(store)
    }

    fn validate(&self) -> Result<(), CoreError> {
        for vlan in &self.vlans {
            vlan.validate()?;
            if !self.fabrics.iter().any(|f| f.id == vlan.fabric_id) {
                return Err(CoreError::validation(format!(
                    "VLAN {} references unknown fabric {}",
                    vlan.id, vlan.fabric_id
                )));
            }
        }
        for subnet in &self.subnets {
            subnet.validate()?;
            if !self.vlans.iter().any(|v| v.id == subnet.vlan_id) {
                return Err(CoreError::validation(format!(
                    "subnet {} references unknown VLAN {}",
                    subnet.id, subnet.vlan_id
                )));
            }
        }
        for range in &self.ip_ranges {
            let subnet = self
                .subnets
                .iter()
                .find(|s| s.id == range.subnet_id)
                .ok_or_else(|| {
                    CoreError::validation(format!(
                        "range {} references unknown subnet {}",
                        range.id, range.subnet_id
                    ))
                })?;
            range.validate(subnet)?;
        }
        for address in &self.addresses {
            if !self.interfaces.iter().any(|i| i.id == address.interface_id) {
                return Err(CoreError::validation(format!(
                    "address {} references unknown interface {}",
                    address.id, address.interface_id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{FabricId, SubnetId, VlanId};
    use crate::store::Topology;
    use pretty_assertions::assert_eq;

    fn sample() -> TopologySnapshot {
        TopologySnapshot {
            fabrics: vec![Fabric::new(FabricId(1))],
            vlans: vec![Vlan::new(VlanId(2), FabricId(1), 0)],
            subnets: vec![Subnet::new(
                SubnetId(3),
                VlanId(2),
                "10.0.0.0/24".parse().unwrap(),
            )],
            ..TopologySnapshot::default()
        }
    }

    #[test]
    fn store_round_trip_preserves_entities() {
        let snapshot = sample();
        let store = snapshot.clone().into_store().unwrap();
        assert_eq!(TopologySnapshot::capture(&store), snapshot);
        assert!(store.next_id() > 3);
    }

    #[test]
    fn dangling_references_are_rejected() {
        let mut snapshot = sample();
        snapshot.subnets[0].vlan_id = VlanId(99);
        assert!(matches!(
            snapshot.into_store(),
            Err(CoreError::ValidationFailed { .. })
        ));
    }
}
