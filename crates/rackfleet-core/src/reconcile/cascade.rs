// ── Interface deletion with dependents ──

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::model::{Interface, InterfaceId, InterfaceKind};
use crate::store::Topology;

/// Delete an interface together with everything that cannot outlive it.
///
/// VLAN-tagged children are always removed. Bonds and bridges are removed
/// once their last parent is gone; otherwise the deleted id is dropped from
/// their parent list. Addresses on every deleted interface go too.
/// Returns the deleted interfaces, children before parents.
pub fn cascade_delete_interface(store: &dyn Topology, id: InterfaceId) -> Vec<Arc<Interface>> {
    let mut deleted = Vec::new();
    let mut visiting = BTreeSet::new();
    delete_tree(store, id, &mut visiting, &mut deleted);
    deleted
}

fn delete_tree(
    store: &dyn Topology,
    id: InterfaceId,
    visiting: &mut BTreeSet<InterfaceId>,
    deleted: &mut Vec<Arc<Interface>>,
) {
    if !visiting.insert(id) {
        return;
    }

    for child in store.children_of(id) {
        let remaining: Vec<InterfaceId> = child
            .parents
            .iter()
            .copied()
            .filter(|parent| *parent != id)
            .collect();

        let orphaned = child.kind == InterfaceKind::Vlan
            || (child.kind.is_aggregate() && remaining.is_empty());
        if orphaned {
            delete_tree(store, child.id, visiting, deleted);
        } else {
            let mut detached = (*child).clone();
            detached.parents = remaining;
            store.save_interface(detached);
        }
    }

    for address in store.addresses_on_interface(id) {
        store.delete_address(address.id);
    }
    if let Some(interface) = store.delete_interface(id) {
        deleted.push(interface);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{AddressId, AllocType, NodeId, StaticAddress};
    use crate::store::{AddressRepository, DataStore, InterfaceRepository};

    fn iface(store: &DataStore, id: u64, name: &str, kind: InterfaceKind, parents: &[u64]) {
        let mut interface = Interface::new(InterfaceId(id), NodeId(1), name, kind);
        interface.parents = parents.iter().copied().map(InterfaceId).collect();
        store.save_interface(interface);
    }

    #[test]
    fn removes_vlan_children_and_orphaned_bonds() {
        let store = DataStore::new();
        iface(&store, 1, "eth0", InterfaceKind::Physical, &[]);
        iface(&store, 2, "eth1", InterfaceKind::Physical, &[]);
        iface(&store, 3, "bond0", InterfaceKind::Bond, &[1]);
        iface(&store, 4, "bond0.10", InterfaceKind::Vlan, &[3]);
        iface(&store, 5, "br0", InterfaceKind::Bridge, &[1, 2]);
        store.save_address(StaticAddress::new(AddressId(9), InterfaceId(4), AllocType::Sticky));

        let deleted: Vec<String> = cascade_delete_interface(&store, InterfaceId(1))
            .iter()
            .map(|i| i.name.clone())
            .collect();

        assert_eq!(deleted, vec!["bond0.10", "bond0", "eth0"]);
        assert!(store.address(AddressId(9)).is_none());
        assert_eq!(store.interface(InterfaceId(5)).unwrap().parents, vec![InterfaceId(2)]);
        assert!(store.interface(InterfaceId(2)).is_some());
    }

    #[test]
    fn missing_interface_is_a_noop() {
        let store = DataStore::new();
        assert!(cascade_delete_interface(&store, InterfaceId(42)).is_empty());
    }
}
