//! `rackfleet dhcp-config`: the DHCP configuration a rack would be sent.

use rackfleet_api::IpFamily;
use rackfleet_api::dhcp::DhcpConfig;
use rackfleet_core::dhcp_configuration;
use serde::Serialize;
use tabled::Tabled;

use crate::cli::{DhcpConfigArgs, FamilyArg, GlobalOpts};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SubnetRow {
    #[tabled(rename = "Family")]
    family: String,
    #[tabled(rename = "Network")]
    network: String,
    #[tabled(rename = "Interface")]
    interface: String,
    #[tabled(rename = "Subnet")]
    subnet: String,
    #[tabled(rename = "Pools")]
    pools: String,
    #[tabled(rename = "Failover")]
    failover: String,
}

fn subnet_rows(family: IpFamily, config: &DhcpConfig) -> Vec<SubnetRow> {
    config
        .shared_networks
        .iter()
        .flat_map(|network| {
            network.subnets.iter().map(move |subnet| SubnetRow {
                family: family.to_string(),
                network: network.name.clone(),
                interface: network.interface.clone().unwrap_or_default(),
                subnet: subnet.subnet_cidr.clone(),
                pools: subnet
                    .pools
                    .iter()
                    .map(|pool| format!("{}-{}", pool.ip_range_low, pool.ip_range_high))
                    .collect::<Vec<_>>()
                    .join(", "),
                failover: subnet
                    .pools
                    .iter()
                    .find_map(|pool| pool.failover_peer.clone())
                    .unwrap_or_default(),
            })
        })
        .collect()
}

/// Family payloads selected by `--family`, keyed for structured output.
#[derive(Serialize)]
struct Selected<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    v4: Option<&'a DhcpConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    v6: Option<&'a DhcpConfig>,
}

impl Selected<'_> {
    fn families(&self) -> impl Iterator<Item = (IpFamily, &DhcpConfig)> {
        [(IpFamily::V4, self.v4), (IpFamily::V6, self.v6)]
            .into_iter()
            .filter_map(|(family, config)| config.map(|config| (family, config)))
    }
}

fn detail(selected: &Selected<'_>, color: bool) -> String {
    let rows: Vec<SubnetRow> = selected
        .families()
        .flat_map(|(family, config)| subnet_rows(family, config))
        .collect();
    if rows.is_empty() {
        return output::status("DHCP is off on this rack", false, color);
    }

    let mut out = output::render_table(&rows);
    for (family, config) in selected.families() {
        out.push('\n');
        out.push_str(&output::heading(&format!("{family}:"), color));
        out.push_str(&format!(
            " {} host reservation(s), {} failover peer(s), interfaces [{}]",
            config.hosts.len(),
            config.failover_peers.len(),
            config
                .interfaces
                .iter()
                .map(|iface| iface.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ));
    }
    out
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &DhcpConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = util::load_topology(&args.topology)?;
    let rack = util::resolve_node(&store, &args.rack)?;
    let config = dhcp_configuration(&store, rack.id, None)?;

    let selected = Selected {
        v4: matches!(args.family, None | Some(FamilyArg::V4)).then_some(&config.v4),
        v6: matches!(args.family, None | Some(FamilyArg::V6)).then_some(&config.v6),
    };

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        &selected,
        |s| detail(s, color),
        |s| {
            s.families()
                .flat_map(|(family, config)| subnet_rows(family, config))
                .map(|row| row.subnet)
                .collect::<Vec<_>>()
                .join("\n")
        },
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
