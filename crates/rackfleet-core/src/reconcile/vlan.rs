// ── VLAN and fabric resolution ──

use std::sync::Arc;

use rackfleet_api::interfaces::{BeaconHint, HintKind, LinkMode, ReportedLink};
use tracing::info;

use super::Reconciler;
use crate::model::{
    DEFAULT_VID, Fabric, FabricId, Interface, InterfaceKind, MacAddress, Vlan, VlanId,
};

impl Reconciler<'_> {
    /// VLAN implied by the subnets of `links`: the first static link on a
    /// known subnet wins, then the first DHCP lease on one.
    pub(super) fn links_vlan(&self, links: &[ReportedLink]) -> Option<VlanId> {
        let mut leased = None;
        for link in links {
            let Some(subnet) = link.address.and_then(|net| self.find_subnet(net)) else {
                continue;
            };
            match link.mode {
                LinkMode::Static => return Some(subnet.vlan_id),
                LinkMode::Dhcp => {
                    leased.get_or_insert(subnet.vlan_id);
                }
            }
        }
        leased
    }

    /// `vlan` if it still exists.
    pub(super) fn live_vlan(&self, vlan: Option<VlanId>) -> Option<VlanId> {
        vlan.filter(|id| self.store.vlan(*id).is_some())
    }

    // ── Beaconing hints ──────────────────────────────────────────────

    /// VLAN of an interface that beaconing shows on the same broadcast
    /// domain as `ifname`. Only untagged observations count.
    pub(super) fn vlan_from_hints(&self, ifname: &str) -> Option<VlanId> {
        self.hints
            .iter()
            .filter(|hint| hint.ifname == ifname && hint.vid.is_none() && hint.related_vid.is_none())
            .filter_map(|hint| self.related_interface(hint))
            .find_map(|related| self.live_vlan(related.vlan_id))
    }

    fn related_interface(&self, hint: &BeaconHint) -> Option<Arc<Interface>> {
        match hint.hint {
            HintKind::OnRemoteNetwork | HintKind::RoutableTo => {
                let mac = MacAddress::parse(hint.related_mac.as_deref()?).ok()?;
                let candidates = self.store.interfaces_with_mac(&mac);
                let physical = candidates
                    .iter()
                    .find(|iface| iface.kind == InterfaceKind::Physical);
                physical
                    .or_else(|| {
                        candidates.iter().find(|iface| {
                            iface.kind == InterfaceKind::Bridge
                                && hint.related_ifname.as_deref() == Some(iface.name.as_str())
                        })
                    })
                    .cloned()
            }
            HintKind::RxOwnBeaconOnOtherInterface | HintKind::SameLocalFabricAs => {
                let related = hint.related_ifname.as_deref()?;
                match self.processed.get(related) {
                    Some(id) => self.store.interface(*id),
                    None => self
                        .store
                        .interfaces_on_node(self.node.id)
                        .into_iter()
                        .find(|iface| iface.name == related),
                }
            }
        }
    }

    // ── Fabric creation ──────────────────────────────────────────────

    /// Untagged VLAN of the default fabric while nothing uses it, else the
    /// untagged VLAN of a brand new fabric.
    pub(super) fn fallback_vlan(&mut self) -> VlanId {
        let unused_default = self.store.fabrics().first().and_then(|fabric| {
            self.store
                .vlans_on_fabric(fabric.id)
                .into_iter()
                .find(|vlan| vlan.vid == DEFAULT_VID)
        });
        match unused_default {
            Some(vlan) if self.store.interfaces_on_vlan(vlan.id).is_empty() => vlan.id,
            _ => self.create_fabric().1,
        }
    }

    /// Lowest-numbered fabric, created when none exists.
    pub(super) fn default_fabric(&mut self) -> FabricId {
        if let Some(fabric) = self.store.fabrics().first() {
            return fabric.id;
        }
        self.create_fabric().0
    }

    /// New fabric with its untagged VLAN.
    fn create_fabric(&mut self) -> (FabricId, VlanId) {
        let fabric = Fabric::new(FabricId(self.store.next_id()));
        let vlan = Vlan::new(VlanId(self.store.next_id()), fabric.id, DEFAULT_VID);
        let ids = (fabric.id, vlan.id);

        info!(node = %self.node.hostname, fabric = %fabric.id, "created fabric");
        self.new_fabrics.insert(fabric.id);
        self.outcome.fabrics_created.insert(fabric.id);
        self.store.save_fabric(fabric);
        self.store.save_vlan(vlan);
        ids
    }

    pub(super) fn get_or_create_vlan(&mut self, fabric: FabricId, vid: u16) -> VlanId {
        if let Some(existing) = self
            .store
            .vlans_on_fabric(fabric)
            .into_iter()
            .find(|vlan| vlan.vid == vid)
        {
            return existing.id;
        }
        let vlan = Vlan::new(VlanId(self.store.next_id()), fabric, vid);
        let vlan_id = vlan.id;
        info!(fabric = %fabric, vid, "created VLAN");
        self.store.save_vlan(vlan);
        vlan_id
    }

    /// Drop fabrics created in this pass that ended up unused, e.g. when a
    /// bond pulled its members onto one VLAN.
    pub(super) fn prune_new_fabrics(&mut self) {
        let created: Vec<FabricId> = self.new_fabrics.iter().copied().collect();
        for fabric in created {
            let vlans = self.store.vlans_on_fabric(fabric);
            let unused = vlans.iter().all(|vlan| {
                self.store.interfaces_on_vlan(vlan.id).is_empty()
                    && self.store.subnets_on_vlan(vlan.id).is_empty()
            });
            if !unused {
                continue;
            }
            for vlan in vlans {
                self.store.delete_vlan(vlan.id);
            }
            self.store.delete_fabric(fabric);
            self.new_fabrics.remove(&fabric);
            self.outcome.fabrics_created.remove(&fabric);
            info!(fabric = %fabric, "removed unused fabric");
        }
    }
}
