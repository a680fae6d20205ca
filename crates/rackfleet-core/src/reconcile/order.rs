// ── Deterministic dependency ordering ──
//
// Kahn's algorithm over the parent relation. Ties are broken by
// (kind rank, name) so identical reports always process in the same
// order and physical interfaces come first whenever the graph allows.

use std::collections::{BTreeMap, BTreeSet};

use rackfleet_api::interfaces::{InterfaceReport, InterfaceType};

use crate::error::CoreError;

fn rank(kind: InterfaceType) -> u8 {
    match kind {
        InterfaceType::Physical => 0,
        InterfaceType::Bond => 1,
        InterfaceType::Bridge => 2,
        InterfaceType::Vlan => 3,
    }
}

/// Names from `report`, parents before children.
///
/// Parents that are not part of the report are ignored here; the
/// reconciler decides what to do with them. A cycle is a validation error.
pub fn dependency_order(report: &InterfaceReport) -> Result<Vec<&str>, CoreError> {
    let mut pending: BTreeMap<&str, usize> = BTreeMap::new();
    let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, iface) in report {
        let known: BTreeSet<&str> = iface
            .parents
            .iter()
            .map(String::as_str)
            .filter(|p| report.contains_key(*p))
            .collect();
        pending.insert(name.as_str(), known.len());
        for parent in known {
            children.entry(parent).or_default().push(name.as_str());
        }
    }

    let mut ready: BTreeSet<(u8, &str)> = report
        .iter()
        .filter(|(name, _)| pending.get(name.as_str()) == Some(&0))
        .map(|(name, iface)| (rank(iface.kind), name.as_str()))
        .collect();

    let mut order = Vec::with_capacity(report.len());
    while let Some((_, name)) = ready.pop_first() {
        order.push(name);
        for child in children.get(name).into_iter().flatten() {
            if let Some(count) = pending.get_mut(child) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    if let Some(iface) = report.get(*child) {
                        ready.insert((rank(iface.kind), *child));
                    }
                }
            }
        }
    }

    if order.len() < report.len() {
        let stuck: Vec<&str> = pending
            .iter()
            .filter(|(name, _)| !order.contains(name))
            .map(|(name, _)| *name)
            .collect();
        return Err(CoreError::validation(format!(
            "interface parents form a cycle: {}",
            stuck.join(", ")
        )));
    }

    Ok(order)
}
