// ── Region-wide network settings ──

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Global knobs consulted by the DHCP synthesizer and the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct NetworkSettings {
    pub default_domain: String,
    /// Extra DNS search domains after the default one.
    pub search_domains: Vec<String>,
    /// Advertise only `upstream_dns` on every subnet.
    pub dns_external_only: bool,
    pub upstream_dns: Vec<IpAddr>,
    /// Region resolver addresses. The first of each family is the
    /// region's default source address.
    pub region_dns: Vec<IpAddr>,
    /// Proxy DNS through the rack controllers serving a subnet.
    pub use_rack_proxy: bool,
    pub ntp_external_only: bool,
    pub ntp_servers: Vec<String>,
    pub network_discovery: bool,
    /// Shared OMAPI key, generated on first use.
    pub omapi_key: Option<String>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            default_domain: "maas".into(),
            search_domains: Vec::new(),
            dns_external_only: false,
            upstream_dns: Vec::new(),
            region_dns: Vec::new(),
            use_rack_proxy: true,
            ntp_external_only: false,
            ntp_servers: Vec::new(),
            network_discovery: true,
            omapi_key: None,
        }
    }
}
