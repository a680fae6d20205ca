// ── Address links ──

use std::collections::BTreeSet;
use std::sync::Arc;

use ipnetwork::IpNetwork;
use rackfleet_api::interfaces::{LinkMode, ReportedLink};
use tracing::info;

use super::Reconciler;
use crate::model::subnet::{canonical, is_host_prefix};
use crate::model::{AddressId, AllocType, Interface, StaticAddress, Subnet, SubnetId, VlanId};

impl Reconciler<'_> {
    /// Subnet holding `net`: the exact network, or for a host prefix the
    /// narrowest known subnet containing the address.
    pub(super) fn find_subnet(&self, net: IpNetwork) -> Option<Arc<Subnet>> {
        if is_host_prefix(net) {
            return self
                .store
                .subnets()
                .into_iter()
                .filter(|subnet| subnet.contains(net.ip()))
                .max_by_key(|subnet| subnet.cidr.prefix());
        }
        let cidr = canonical(net);
        self.store
            .subnets()
            .into_iter()
            .find(|subnet| subnet.cidr == cidr)
    }

    /// Rewrite the addresses of `iface` to match `links`.
    ///
    /// Static links become sticky addresses (taken over from wherever the
    /// IP currently lives). DHCP links keep one DHCP address plus a
    /// discovered address for a known lease. Everything else on the
    /// interface, temporary allocations included, is removed. With
    /// `force_vlan`, links on subnets of another VLAN are skipped.
    ///
    /// Returns the addresses backing the links.
    pub(super) fn update_links(
        &mut self,
        iface: &Interface,
        links: &[ReportedLink],
        force_vlan: bool,
    ) -> Vec<StaticAddress> {
        let current = self.store.addresses_on_interface(iface.id);
        let mut kept = BTreeSet::new();
        let mut linked = Vec::new();

        for link in links {
            match link.mode {
                LinkMode::Dhcp => {
                    let mut dhcp = current
                        .iter()
                        .find(|a| a.alloc_type == AllocType::Dhcp && !kept.contains(&a.id))
                        .map_or_else(
                            || {
                                StaticAddress::new(
                                    AddressId(self.store.next_id()),
                                    iface.id,
                                    AllocType::Dhcp,
                                )
                            },
                            |a| (**a).clone(),
                        );
                    dhcp.ip = None;
                    dhcp.subnet_id = None;
                    dhcp.temp_expires_on = None;
                    kept.insert(dhcp.id);
                    self.save_address(&dhcp);

                    if let Some(lease) = self.lease_address(iface, link, force_vlan) {
                        kept.insert(lease.id);
                        linked.push(lease);
                    }
                    linked.push(dhcp);
                }
                LinkMode::Static => {
                    if let Some(sticky) = self.sticky_address(iface, link, force_vlan) {
                        kept.insert(sticky.id);
                        linked.push(sticky);
                    }
                }
            }
        }

        for address in current {
            if !kept.contains(&address.id) {
                self.store.delete_address(address.id);
            }
        }
        linked
    }

    /// VLAN of the addresses backing a set of links: sticky first, then
    /// discovered leases.
    pub(super) fn linked_vlan(&self, linked: &[StaticAddress]) -> Option<VlanId> {
        let vlan_of = |alloc: AllocType| {
            linked
                .iter()
                .filter(|a| a.alloc_type == alloc)
                .filter_map(|a| a.subnet_id)
                .find_map(|id| self.store.subnet(id))
                .map(|subnet| subnet.vlan_id)
        };
        vlan_of(AllocType::Sticky).or_else(|| vlan_of(AllocType::Discovered))
    }

    fn sticky_address(
        &mut self,
        iface: &Interface,
        link: &ReportedLink,
        force_vlan: bool,
    ) -> Option<StaticAddress> {
        let net = link.address?;
        let subnet = self.subnet_for_link(iface, net, force_vlan)?;

        if let Some(gateway) = link.gateway {
            if subnet.gateway_ip.is_none() && subnet.contains(gateway) {
                let mut updated = (*subnet).clone();
                updated.gateway_ip = Some(gateway);
                info!(subnet = %subnet.cidr, %gateway, "set subnet gateway from link");
                self.store.save_subnet(updated);
            }
        }

        let ip = net.ip();
        let candidates = self.store.addresses_with_ip(ip);
        let reusable = candidates.iter().filter(|a| !a.is_temporary());
        let mut sticky = reusable
            .clone()
            .find(|a| a.interface_id == iface.id)
            .or_else(|| reusable.clone().find(|a| a.alloc_type != AllocType::Dhcp))
            .map_or_else(
                || {
                    StaticAddress::new(
                        AddressId(self.store.next_id()),
                        iface.id,
                        AllocType::Sticky,
                    )
                },
                |a| (**a).clone(),
            );
        sticky.interface_id = iface.id;
        sticky.alloc_type = AllocType::Sticky;
        sticky.ip = Some(ip);
        sticky.subnet_id = Some(subnet.id);
        sticky.temp_expires_on = None;
        self.save_address(&sticky);
        Some(sticky)
    }

    fn lease_address(
        &mut self,
        iface: &Interface,
        link: &ReportedLink,
        force_vlan: bool,
    ) -> Option<StaticAddress> {
        let net = link.address?;
        let subnet = self.subnet_for_link(iface, net, force_vlan)?;

        let ip = net.ip();
        let mut lease = self
            .store
            .addresses_with_ip(ip)
            .into_iter()
            .find(|a| a.alloc_type == AllocType::Discovered)
            .map_or_else(
                || {
                    StaticAddress::new(
                        AddressId(self.store.next_id()),
                        iface.id,
                        AllocType::Discovered,
                    )
                },
                |a| (*a).clone(),
            );
        lease.interface_id = iface.id;
        lease.ip = Some(ip);
        lease.subnet_id = Some(subnet.id);
        lease.temp_expires_on = None;
        self.save_address(&lease);
        Some(lease)
    }

    /// Subnet for a link, created on the interface's VLAN when unknown.
    fn subnet_for_link(
        &mut self,
        iface: &Interface,
        net: IpNetwork,
        force_vlan: bool,
    ) -> Option<Arc<Subnet>> {
        let subnet = if let Some(found) = self.find_subnet(net) {
            found
        } else {
            let Some(vlan) = iface.vlan_id else {
                self.conflict(format!(
                    "cannot record {net} on interface {}: the interface has no VLAN",
                    iface.name
                ));
                return None;
            };
            let created = Subnet::new(SubnetId(self.store.next_id()), vlan, net);
            info!(subnet = %created.cidr, vlan = %vlan, "created subnet from link");
            self.store.save_subnet(created.clone());
            Arc::new(created)
        };

        if force_vlan && Some(subnet.vlan_id) != iface.vlan_id {
            self.conflict(format!(
                "Unable to update IP address {net} assigned to interface {} on {}: \
                 subnet {} is not on the interface's VLAN",
                iface.name, self.node.hostname, subnet.cidr
            ));
            return None;
        }
        Some(subnet)
    }

    fn save_address(&self, address: &StaticAddress) {
        if self.store.address(address.id).as_deref() != Some(address) {
            self.store.save_address(address.clone());
        }
    }
}
