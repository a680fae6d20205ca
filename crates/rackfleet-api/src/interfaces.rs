//! Interface inventory as reported by a controller.
//!
//! A report maps interface name to what the controller observed on that
//! interface. The region merges it into its topology model.

use std::collections::BTreeMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

/// Interface name → observed descriptor. Ordered so that reports
/// serialize deterministically.
pub type InterfaceReport = BTreeMap<String, ReportedInterface>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Physical,
    Bond,
    Bridge,
    Vlan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedInterface {
    #[serde(rename = "type")]
    pub kind: InterfaceType,
    /// Ignored for VLAN-tagged interfaces, which take their parent's MAC.
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub links: Vec<ReportedLink>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 802.1Q tag; required for VLAN-tagged interfaces.
    #[serde(default)]
    pub vid: Option<u16>,
    /// Whether the controller monitors this interface for neighbours.
    #[serde(default)]
    pub monitored: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Static,
    Dhcp,
}

/// One address configured (or leased) on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedLink {
    pub mode: LinkMode,
    /// Address with prefix length, e.g. `10.0.0.5/24`. Absent for a DHCP
    /// link that has no lease yet.
    #[serde(default)]
    pub address: Option<IpNetwork>,
    #[serde(default)]
    pub gateway: Option<IpAddr>,
}

// ── Beaconing hints ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    OnRemoteNetwork,
    RoutableTo,
    RxOwnBeaconOnOtherInterface,
    SameLocalFabricAs,
}

/// Evidence from beacon probing that `ifname` shares a broadcast domain
/// with another interface (possibly on another controller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeaconHint {
    pub ifname: String,
    pub hint: HintKind,
    #[serde(default)]
    pub related_ifname: Option<String>,
    #[serde(default)]
    pub related_mac: Option<String>,
    #[serde(default)]
    pub vid: Option<u16>,
    #[serde(default)]
    pub related_vid: Option<u16>,
}
