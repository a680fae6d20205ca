//! Interface reconciliation.
//!
//! Merges the interface inventory a controller reports into the topology
//! model. Interfaces are created or updated in dependency order, VLANs are
//! inferred from links, existing state, beaconing hints or (when allowed)
//! freshly created fabrics, and anything the report no longer mentions is
//! deleted together with its dependents.
//!
//! Every write is skipped when the stored row already matches, so applying
//! the same report twice leaves the store untouched the second time.

mod apply;
mod cascade;
mod links;
mod order;
mod vlan;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rackfleet_api::interfaces::{BeaconHint, InterfaceReport, InterfaceType, LinkMode};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::CoreError;
use crate::model::{
    FabricId, Interface, InterfaceId, InterfaceKind, MAX_VID, MacAddress, NetworkSettings, Node,
    NodeId,
};
use crate::store::Topology;

pub use cascade::cascade_delete_interface;
pub use order::dependency_order;

/// What a reconciliation changed. Interface names refer to the reconciled
/// controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub created: BTreeSet<String>,
    pub updated: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    /// Enabled interfaces whose VLAN could not be resolved without creating
    /// a fabric.
    pub deferred: BTreeSet<String>,
    pub fabrics_created: BTreeSet<FabricId>,
    /// Logged state conflicts, in the order they were found.
    pub warnings: Vec<String>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.deleted.is_empty()
            && self.fabrics_created.is_empty()
    }

    /// Fold a later pass over the same report into this one.
    fn absorb(&mut self, later: Self) {
        self.created.extend(later.created);
        self.updated.extend(later.updated);
        self.updated.retain(|name| !self.created.contains(name));
        self.deleted.extend(later.deleted);
        self.deferred = later.deferred;
        self.fabrics_created.extend(later.fabrics_created);
        for warning in later.warnings {
            if !self.warnings.contains(&warning) {
                self.warnings.push(warning);
            }
        }
    }
}

// ── Entry points ─────────────────────────────────────────────────────

/// Apply `report` for `node`, creating fabrics for unplaced interfaces.
pub fn reconcile(
    store: &dyn Topology,
    node: NodeId,
    report: &InterfaceReport,
) -> Result<ReconcileOutcome, CoreError> {
    reconcile_with_hints(store, node, report, &[])
}

/// Apply `report` for `node` using beaconing hints.
///
/// With hints present the report is applied twice: the first pass only
/// places interfaces on VLANs that already exist, the second may create
/// fabrics and consults the hints, so interfaces shown to share a
/// broadcast domain land on one fabric instead of one each.
pub fn reconcile_with_hints(
    store: &dyn Topology,
    node: NodeId,
    report: &InterfaceReport,
    hints: &[BeaconHint],
) -> Result<ReconcileOutcome, CoreError> {
    let node = store
        .node(node)
        .ok_or_else(|| CoreError::not_found("node", node.to_string()))?;
    validate_report(report)?;
    let order = dependency_order(report)?;

    if hints.is_empty() {
        return Ok(Reconciler::new(store, Arc::clone(&node), true, hints).run(report, &order));
    }

    let mut outcome = Reconciler::new(store, Arc::clone(&node), false, &[]).run(report, &order);
    outcome.absorb(Reconciler::new(store, node, true, hints).run(report, &order));
    Ok(outcome)
}

/// Reject malformed reports before anything is written.
pub fn validate_report(report: &InterfaceReport) -> Result<(), CoreError> {
    let mut physical_macs: BTreeMap<MacAddress, &str> = BTreeMap::new();

    for (name, iface) in report {
        if name.trim().is_empty() {
            return Err(CoreError::validation("interface name must not be empty"));
        }
        if iface.parents.iter().any(|parent| parent == name) {
            return Err(CoreError::validation(format!(
                "interface {name} lists itself as a parent"
            )));
        }
        if let Some(vid) = iface.vid {
            if vid > MAX_VID {
                return Err(CoreError::validation(format!(
                    "interface {name}: vid {vid} is outside 0-{MAX_VID}"
                )));
            }
        }

        match iface.kind {
            InterfaceType::Physical => {
                if !iface.parents.is_empty() {
                    return Err(CoreError::validation(format!(
                        "physical interface {name} cannot have parents"
                    )));
                }
                let Some(mac) = iface.mac_address.as_deref() else {
                    return Err(CoreError::validation(format!(
                        "physical interface {name} has no MAC address"
                    )));
                };
                if let Some(other) = physical_macs.insert(MacAddress::parse(mac)?, name.as_str()) {
                    return Err(CoreError::validation(format!(
                        "physical interfaces {other} and {name} share MAC {mac}"
                    )));
                }
            }
            InterfaceType::Bond | InterfaceType::Bridge => {
                if let Some(mac) = iface.mac_address.as_deref() {
                    MacAddress::parse(mac)?;
                }
            }
            InterfaceType::Vlan => {
                let [parent] = iface.parents.as_slice() else {
                    return Err(CoreError::validation(format!(
                        "VLAN interface {name} needs exactly one parent"
                    )));
                };
                if !report.contains_key(parent) {
                    return Err(CoreError::validation(format!(
                        "VLAN interface {name}: parent {parent} is not in the report"
                    )));
                }
                if iface.vid.is_none() {
                    return Err(CoreError::validation(format!(
                        "VLAN interface {name} has no vid"
                    )));
                }
            }
        }

        for link in &iface.links {
            if link.mode == LinkMode::Static && link.address.is_none() {
                return Err(CoreError::validation(format!(
                    "interface {name}: static link without an address"
                )));
            }
        }
    }
    Ok(())
}

// ── Reconciler ───────────────────────────────────────────────────────

/// State for one pass over one report.
struct Reconciler<'a> {
    store: &'a dyn Topology,
    node: Arc<Node>,
    settings: Arc<NetworkSettings>,
    create_fabrics: bool,
    hints: &'a [BeaconHint],
    /// Reported name → interface row written during this pass.
    processed: BTreeMap<String, InterfaceId>,
    /// Fabrics created during this pass; pruned again if left empty.
    new_fabrics: BTreeSet<FabricId>,
    outcome: ReconcileOutcome,
}

impl<'a> Reconciler<'a> {
    fn new(
        store: &'a dyn Topology,
        node: Arc<Node>,
        create_fabrics: bool,
        hints: &'a [BeaconHint],
    ) -> Self {
        Self {
            settings: store.settings(),
            store,
            node,
            create_fabrics,
            hints,
            processed: BTreeMap::new(),
            new_fabrics: BTreeSet::new(),
            outcome: ReconcileOutcome::default(),
        }
    }

    fn run(mut self, report: &InterfaceReport, order: &[&str]) -> ReconcileOutcome {
        debug!(
            node = %self.node.hostname,
            interfaces = order.len(),
            create_fabrics = self.create_fabrics,
            "reconciling interfaces"
        );

        for name in order {
            let Some(reported) = report.get(*name) else {
                continue;
            };
            let applied = match reported.kind {
                InterfaceType::Physical => self.apply_physical(name, reported),
                InterfaceType::Bond | InterfaceType::Bridge => {
                    self.apply_aggregate(name, reported)
                }
                InterfaceType::Vlan => self.apply_tagged(name, reported),
            };
            if let Some(id) = applied {
                self.processed.insert((*name).to_owned(), id);
            }
        }

        self.delete_stale();
        self.prune_new_fabrics();
        self.outcome
    }

    /// Remove interfaces of this node that the report no longer mentions.
    fn delete_stale(&mut self) {
        let kept: BTreeSet<InterfaceId> = self.processed.values().copied().collect();
        for stale in self.store.interfaces_on_node(self.node.id) {
            if kept.contains(&stale.id) || self.store.interface(stale.id).is_none() {
                continue;
            }
            self.delete_interface(stale.id);
        }
    }

    // ── Shared helpers ───────────────────────────────────────────────

    /// Interface on this node called `name`. One of a different kind is
    /// deleted so the caller recreates it.
    fn existing_by_name(&mut self, name: &str, kind: InterfaceType) -> Option<Arc<Interface>> {
        let found = self
            .store
            .interfaces_on_node(self.node.id)
            .into_iter()
            .find(|iface| iface.name == name)?;
        if found.kind == InterfaceKind::from(kind) {
            return Some(found);
        }
        info!(
            node = %self.node.hostname,
            interface = name,
            "interface changed type, replacing it"
        );
        self.delete_interface(found.id);
        None
    }

    fn delete_interface(&mut self, id: InterfaceId) {
        for deleted in cascade_delete_interface(self.store, id) {
            info!(node = %self.node.hostname, interface = %deleted.name, "deleted interface");
            if deleted.node_id == Some(self.node.id) {
                self.outcome.deleted.insert(deleted.name.clone());
            }
        }
    }

    /// Persist `after` when it differs from `before` and record the change.
    fn commit(&mut self, before: Option<&Interface>, after: Interface) -> InterfaceId {
        let id = after.id;
        match before {
            None => {
                self.outcome.deleted.remove(&after.name);
                self.outcome.created.insert(after.name.clone());
            }
            Some(previous) if *previous != after => {
                if !self.outcome.created.contains(&after.name) {
                    self.outcome.updated.insert(after.name.clone());
                }
            }
            Some(_) => return id,
        }
        self.store.save_interface(after);
        id
    }

    fn set_discovery(&self, iface: &mut Interface, monitored: bool) {
        let discovery = self.settings.network_discovery && iface.enabled;
        iface.neighbour_discovery = discovery && monitored;
        iface.mdns_discovery = discovery;
    }

    /// Log a non-fatal inconsistency and keep it for the outcome.
    fn conflict(&mut self, message: String) {
        error!(node = %self.node.hostname, "{message}");
        if !self.outcome.warnings.contains(&message) {
            self.outcome.warnings.push(message);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::NodeKind;
    use crate::store::{DataStore, NodeRepository};
    use serde_json::json;

    fn report(value: serde_json::Value) -> InterfaceReport {
        serde_json::from_value(value).unwrap()
    }

    fn store_with_node() -> DataStore {
        let store = DataStore::new();
        store.reserve_ids_through(100);
        store.save_node(Node {
            id: NodeId(1),
            system_id: "rack01".into(),
            hostname: "rack1".into(),
            kind: NodeKind::RackController,
            version: None,
        });
        store
    }

    fn rejects(value: serde_json::Value, needle: &str) {
        let store = store_with_node();
        let err = reconcile(&store, NodeId(1), &report(value)).unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed { .. }), "{err}");
        assert!(err.to_string().contains(needle), "{err}");
        assert_eq!(store.interface_count(), 0);
    }

    #[test]
    fn unknown_node_is_not_found() {
        let store = DataStore::new();
        let err = reconcile(&store, NodeId(7), &InterfaceReport::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[test]
    fn malformed_reports_are_rejected_before_mutation() {
        rejects(json!({"eth0": {"type": "physical"}}), "no MAC");
        rejects(
            json!({"eth0": {"type": "physical", "mac_address": "zz:00:00:00:00:01"}}),
            "invalid MAC",
        );
        rejects(
            json!({
                "eth0": {"type": "physical", "mac_address": "00:00:00:00:00:01"},
                "eth0.5000": {"type": "vlan", "parents": ["eth0"], "vid": 5000}
            }),
            "outside",
        );
        rejects(
            json!({"eth0.5": {"type": "vlan", "parents": ["eth0"], "vid": 5}}),
            "not in the report",
        );
        rejects(
            json!({
                "eth0": {"type": "physical", "mac_address": "00:00:00:00:00:01"},
                "eth0.5": {"type": "vlan", "parents": ["eth0"]}
            }),
            "no vid",
        );
        rejects(
            json!({"eth0": {"type": "physical", "mac_address": "00:00:00:00:00:01",
                            "links": [{"mode": "static"}]}}),
            "static link",
        );
        rejects(
            json!({"br0": {"type": "bridge", "parents": ["br0"]}}),
            "itself",
        );
        rejects(
            json!({
                "eth0": {"type": "physical", "mac_address": "00:00:00:00:00:01"},
                "eth1": {"type": "physical", "mac_address": "00-00-00-00-00-01"}
            }),
            "share MAC",
        );
    }

    #[test]
    fn absorb_merges_passes() {
        let mut first = ReconcileOutcome::default();
        first.created.insert("eth0".into());
        first.deferred.insert("eth0".into());
        first.warnings.push("w".into());

        let mut second = ReconcileOutcome::default();
        second.updated.insert("eth0".into());
        second.updated.insert("eth1".into());
        second.warnings.push("w".into());

        first.absorb(second);
        assert!(first.created.contains("eth0"));
        assert_eq!(first.updated.iter().collect::<Vec<_>>(), vec!["eth1"]);
        assert!(first.deferred.is_empty());
        assert_eq!(first.warnings, vec!["w".to_string()]);
    }
}
