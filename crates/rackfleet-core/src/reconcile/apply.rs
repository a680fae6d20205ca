// ── Per-kind interface updates ──

use std::sync::Arc;

use rackfleet_api::interfaces::{InterfaceType, ReportedInterface, ReportedLink};
use tracing::{debug, info};

use super::Reconciler;
use crate::model::{Interface, InterfaceId, InterfaceKind, MacAddress, VlanId};

impl Reconciler<'_> {
    /// Physical NICs are identified by MAC. A row with the same name but
    /// another MAC is a replaced card and goes away; a row with the same MAC
    /// on another node moved here and is rebuilt from scratch.
    pub(super) fn apply_physical(
        &mut self,
        name: &str,
        reported: &ReportedInterface,
    ) -> Option<InterfaceId> {
        let mac = MacAddress::parse(reported.mac_address.as_deref()?).ok()?;

        if let Some(same_name) = self.existing_by_name(name, InterfaceType::Physical) {
            if same_name.mac.as_ref() != Some(&mac) {
                info!(node = %self.node.hostname, interface = name, %mac, "interface MAC changed");
                self.delete_interface(same_name.id);
            }
        }

        let mut existing = self
            .store
            .interfaces_with_mac(&mac)
            .into_iter()
            .find(|iface| iface.kind == InterfaceKind::Physical);
        if let Some(found) = existing.clone() {
            if found.node_id != Some(self.node.id) {
                info!(
                    node = %self.node.hostname,
                    interface = name,
                    %mac,
                    previous = %found.name,
                    "interface moved from another node"
                );
                self.delete_interface(found.id);
                existing = None;
            }
        }

        let mut iface = existing.as_deref().cloned().unwrap_or_else(|| {
            Interface::new(
                InterfaceId(self.store.next_id()),
                self.node.id,
                name,
                InterfaceKind::Physical,
            )
        });
        iface.name = name.to_owned();
        iface.mac = Some(mac);
        iface.enabled = reported.enabled;
        self.set_discovery(&mut iface, reported.monitored);

        iface.vlan_id = if reported.enabled {
            let current = existing.as_ref().and_then(|e| e.vlan_id);
            self.physical_vlan(name, current, &reported.links)
        } else {
            None
        };

        if !self.defer(&iface) {
            self.update_links(&iface, &reported.links, false);
        }
        Some(self.commit(existing.as_deref(), iface))
    }

    fn physical_vlan(
        &mut self,
        name: &str,
        current: Option<VlanId>,
        links: &[ReportedLink],
    ) -> Option<VlanId> {
        if let Some(vlan) = self.links_vlan(links) {
            return Some(vlan);
        }
        if let Some(vlan) = self.live_vlan(current) {
            return Some(vlan);
        }
        if let Some(vlan) = self.vlan_from_hints(name) {
            debug!(node = %self.node.hostname, interface = name, vlan = %vlan, "VLAN from beaconing hints");
            return Some(vlan);
        }
        if self.create_fabrics {
            return Some(self.fallback_vlan());
        }
        None
    }

    /// Bonds and bridges over already-processed parents. A static address
    /// on the aggregate pulls every enabled parent onto its VLAN.
    pub(super) fn apply_aggregate(
        &mut self,
        name: &str,
        reported: &ReportedInterface,
    ) -> Option<InterfaceId> {
        let kind = InterfaceKind::from(reported.kind);
        let parents: Vec<Arc<Interface>> = reported
            .parents
            .iter()
            .filter_map(|parent| self.processed.get(parent))
            .filter_map(|id| self.store.interface(*id))
            .collect();
        if parents.len() < reported.parents.len() {
            debug!(node = %self.node.hostname, interface = name, "ignoring unmodelled parents");
        }
        if parents.is_empty() && kind == InterfaceKind::Bond {
            debug!(node = %self.node.hostname, interface = name, "skipping bond without parents");
            return None;
        }

        let mac = match reported.mac_address.as_deref() {
            Some(raw) => MacAddress::parse(raw).ok(),
            None => parents.first().and_then(|parent| parent.mac.clone()),
        };

        let existing = self.existing_by_name(name, reported.kind);
        let mut iface = existing.as_deref().cloned().unwrap_or_else(|| {
            Interface::new(InterfaceId(self.store.next_id()), self.node.id, name, kind)
        });
        iface.mac = mac;
        iface.enabled = reported.enabled;
        iface.parents = parents.iter().map(|parent| parent.id).collect();
        self.set_discovery(&mut iface, reported.monitored);

        iface.vlan_id = if reported.enabled {
            self.links_vlan(&reported.links)
                .or_else(|| self.live_vlan(parents.first().and_then(|parent| parent.vlan_id)))
                .or_else(|| self.live_vlan(existing.as_ref().and_then(|e| e.vlan_id)))
        } else {
            None
        };
        if iface.enabled
            && iface.vlan_id.is_none()
            && self.create_fabrics
            && !reported.links.is_empty()
        {
            iface.vlan_id = Some(self.fallback_vlan());
        }

        if self.defer(&iface) {
            return Some(self.commit(existing.as_deref(), iface));
        }

        let linked = self.update_links(&iface, &reported.links, false);
        if iface.enabled {
            if let Some(vlan) = self.linked_vlan(&linked) {
                iface.vlan_id = Some(vlan);
                for parent in &parents {
                    if parent.enabled && parent.vlan_id != Some(vlan) {
                        let mut moved = (**parent).clone();
                        moved.vlan_id = Some(vlan);
                        self.commit(Some(parent.as_ref()), moved);
                    }
                }
            }
        }
        Some(self.commit(existing.as_deref(), iface))
    }

    /// 802.1Q sub-interfaces always carry their parent's MAC. The VLAN of
    /// their own addresses is authoritative even when it contradicts the
    /// reported tag or the parent's fabric; the contradiction is logged.
    pub(super) fn apply_tagged(
        &mut self,
        name: &str,
        reported: &ReportedInterface,
    ) -> Option<InterfaceId> {
        let Some(parent) = reported
            .parents
            .first()
            .and_then(|parent| self.processed.get(parent))
            .and_then(|id| self.store.interface(*id))
        else {
            debug!(node = %self.node.hostname, interface = name, "skipping VLAN interface without a modelled parent");
            return None;
        };
        let vid = reported.vid?;

        let existing = self.existing_by_name(name, InterfaceType::Vlan);
        let mut iface = existing.as_deref().cloned().unwrap_or_else(|| {
            Interface::new(
                InterfaceId(self.store.next_id()),
                self.node.id,
                name,
                InterfaceKind::Vlan,
            )
        });
        iface.mac.clone_from(&parent.mac);
        iface.parents = vec![parent.id];
        iface.enabled = reported.enabled;
        self.set_discovery(&mut iface, reported.monitored);

        iface.vlan_id = if reported.enabled {
            self.tagged_vlan(name, vid, &parent, existing.as_deref(), &reported.links)
        } else {
            None
        };

        if !self.defer(&iface) {
            self.update_links(&iface, &reported.links, true);
        }
        Some(self.commit(existing.as_deref(), iface))
    }

    fn tagged_vlan(
        &mut self,
        name: &str,
        vid: u16,
        parent: &Interface,
        existing: Option<&Interface>,
        links: &[ReportedLink],
    ) -> Option<VlanId> {
        let parent_fabric = self
            .live_vlan(parent.vlan_id)
            .and_then(|id| self.store.vlan(id))
            .map(|vlan| vlan.fabric_id);

        if let Some(linked) = self.links_vlan(links).and_then(|id| self.store.vlan(id)) {
            if let Some(fabric) = parent_fabric {
                if linked.fabric_id != fabric {
                    self.conflict(format!(
                        "VLAN interface {name} has addresses on fabric {} but its parent {} is on fabric {fabric}",
                        linked.fabric_id, parent.name
                    ));
                }
            }
            if linked.vid != vid {
                self.conflict(format!(
                    "VLAN interface {name} reports vid {vid} but its addresses are on VLAN {}.{}",
                    linked.fabric_id, linked.vid
                ));
            }
            return Some(linked.id);
        }

        if let Some(fabric) = parent_fabric {
            return Some(self.get_or_create_vlan(fabric, vid));
        }
        if let Some(current) = self.live_vlan(existing.and_then(|e| e.vlan_id)) {
            return Some(current);
        }
        if self.create_fabrics {
            self.conflict(format!(
                "Unable to detect the fabric of VLAN interface {name}; using the default fabric"
            ));
            let fabric = self.default_fabric();
            return Some(self.get_or_create_vlan(fabric, vid));
        }
        None
    }

    /// Enabled interfaces without a VLAN wait for a pass that may create
    /// fabrics; their addresses stay as they are until then.
    fn defer(&mut self, iface: &Interface) -> bool {
        let defer = iface.enabled && iface.vlan_id.is_none() && !self.create_fabrics;
        if defer {
            self.outcome.deferred.insert(iface.name.clone());
        }
        defer
    }
}
