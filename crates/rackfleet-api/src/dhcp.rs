//! DHCP configuration payloads exchanged over `ConfigureDHCPv4/v6`.
//!
//! These mirror the data a rack needs to render its DHCP server
//! configuration. The on-disk grammar of that server is the rack's
//! business; only the structure is fixed here.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

// ── IpFamily ────────────────────────────────────────────────────────

/// Address family served by one DHCP server instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IpFamily {
    #[serde(rename = "4")]
    V4,
    #[serde(rename = "6")]
    V6,
}

impl IpFamily {
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];

    /// Family of a literal address.
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Self::V4,
            IpAddr::V6(_) => Self::V6,
        }
    }

    pub fn version(self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }

    /// Name of the service-status record for this family.
    pub fn service_name(self) -> &'static str {
        match self {
            Self::V4 => "dhcpd",
            Self::V6 => "dhcpd6",
        }
    }

    pub fn matches(self, ip: &IpAddr) -> bool {
        Self::of(ip) == self
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IPv{}", self.version())
    }
}

// ── Config payload ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailoverMode {
    Primary,
    Secondary,
}

/// Failover pairing for one VLAN and family, seen from the asking rack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverPeer {
    pub name: String,
    pub mode: FailoverMode,
    pub address: IpAddr,
    pub peer_address: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetPayload {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value: String,
}

/// One dynamic range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub ip_range_low: IpAddr,
    pub ip_range_high: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failover_peer: Option<String>,
    #[serde(default)]
    pub dhcp_snippets: Vec<SnippetPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubnetConfig {
    pub subnet: IpAddr,
    /// Dotted netmask; IPv4 only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_mask: Option<IpAddr>,
    pub subnet_cidr: String,
    pub broadcast_ip: IpAddr,
    /// Empty when the subnet has no gateway.
    pub router_ip: String,
    pub dns_servers: Vec<IpAddr>,
    pub ntp_servers: Vec<String>,
    pub domain_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_list: Vec<String>,
    pub pools: Vec<Pool>,
    #[serde(default)]
    pub dhcp_snippets: Vec<SnippetPayload>,
    #[serde(default)]
    pub disabled_boot_architectures: Vec<String>,
}

/// One VLAN's worth of subnets served from a single interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedNetwork {
    pub name: String,
    pub mtu: u32,
    pub subnets: Vec<SubnetConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// Static reservation keyed by MAC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReservation {
    pub host: String,
    pub mac: String,
    pub ip: IpAddr,
    #[serde(default)]
    pub dhcp_snippets: Vec<SnippetPayload>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceName {
    pub name: String,
}

/// Full configuration for one family on one rack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpConfig {
    pub omapi_key: String,
    pub failover_peers: Vec<FailoverPeer>,
    pub shared_networks: Vec<SharedNetwork>,
    pub hosts: Vec<HostReservation>,
    pub interfaces: Vec<InterfaceName>,
    pub global_dhcp_snippets: Vec<SnippetPayload>,
}

impl DhcpConfig {
    /// A rack given no shared networks stops its server for this family.
    pub fn is_empty(&self) -> bool {
        self.shared_networks.is_empty()
    }
}

/// Structural problem found by a validate-only call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<String>,
}
