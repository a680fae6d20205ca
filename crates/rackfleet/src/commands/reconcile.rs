//! `rackfleet reconcile`: merge an interface report into a snapshot.

use rackfleet_api::interfaces::{BeaconHint, InterfaceReport};
use rackfleet_core::{ReconcileOutcome, reconcile_with_hints};
use tabled::Tabled;
use tracing::info;

use crate::cli::{GlobalOpts, ReconcileArgs};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Change")]
    change: &'static str,
}

fn rows(outcome: &ReconcileOutcome) -> Vec<ChangeRow> {
    let groups = [
        ("created", &outcome.created),
        ("updated", &outcome.updated),
        ("deleted", &outcome.deleted),
        ("deferred", &outcome.deferred),
    ];
    groups
        .into_iter()
        .flat_map(|(change, names)| {
            names.iter().map(move |name| ChangeRow {
                interface: name.clone(),
                change,
            })
        })
        .collect()
}

fn detail(outcome: &ReconcileOutcome, color: bool) -> String {
    if outcome.is_noop() && outcome.deferred.is_empty() {
        return output::status("No changes", true, color);
    }

    let mut out = output::render_table(&rows(outcome));
    if !outcome.fabrics_created.is_empty() {
        let fabrics: Vec<String> = outcome.fabrics_created.iter().map(ToString::to_string).collect();
        out.push_str(&format!("\nNew fabrics: {}", fabrics.join(", ")));
    }
    for warning in &outcome.warnings {
        out.push('\n');
        out.push_str(&output::status(&format!("warning: {warning}"), false, color));
    }
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &ReconcileArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = util::load_topology(&args.topology)?;
    let node = util::resolve_node(&store, &args.node)?;
    let report: InterfaceReport = util::read_json(&args.report)?;
    let hints: Vec<BeaconHint> = match &args.hints {
        Some(path) => util::read_json(path)?,
        None => Vec::new(),
    };

    let outcome = reconcile_with_hints(&store, node.id, &report, &hints)?;

    if args.write && !outcome.is_noop() {
        util::save_topology(&args.topology, &store)?;
        info!(path = %args.topology.display(), "topology updated");
    }

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &outcome,
        |o| detail(o, color),
        |o| {
            o.created
                .iter()
                .chain(&o.updated)
                .chain(&o.deleted)
                .cloned()
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
