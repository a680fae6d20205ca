// ── Subnets, IP ranges and standalone reservations ──

use std::net::{IpAddr, Ipv6Addr};

use ipnetwork::{IpNetwork, Ipv6Network};
use rackfleet_api::IpFamily;
use serde::{Deserialize, Serialize};

use super::ids::{IpRangeId, MacAddress, ReservedIpId, SubnetId, VlanId};
use crate::error::CoreError;

/// An IP network bound to one VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: SubnetId,
    pub vlan_id: VlanId,
    #[serde(default)]
    pub name: Option<String>,
    pub cidr: IpNetwork,
    #[serde(default)]
    pub gateway_ip: Option<IpAddr>,
    /// Operator-configured resolvers, appended after the defaults.
    #[serde(default)]
    pub dns_servers: Vec<IpAddr>,
    /// Whether rack and region resolvers may be advertised on this subnet.
    #[serde(default = "yes")]
    pub allow_dns: bool,
    /// Only managed subnets are served by the rack DHCP server.
    #[serde(default = "yes")]
    pub managed: bool,
    #[serde(default)]
    pub disabled_boot_architectures: Vec<String>,
}

fn yes() -> bool {
    true
}

impl Subnet {
    /// A subnet on `vlan_id`; host bits in `cidr` are cleared.
    pub fn new(id: SubnetId, vlan_id: VlanId, cidr: IpNetwork) -> Self {
        let cidr = canonical(cidr);
        Self {
            id,
            vlan_id,
            name: Some(cidr.to_string()),
            cidr,
            gateway_ip: None,
            dns_servers: Vec::new(),
            allow_dns: true,
            managed: true,
            disabled_boot_architectures: Vec::new(),
        }
    }

    pub fn family(&self) -> IpFamily {
        IpFamily::of(&self.cidr.ip())
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.cidr.contains(ip)
    }

    pub fn network(&self) -> IpAddr {
        self.cidr.network()
    }

    /// Netmask, IPv4 only.
    pub fn netmask(&self) -> Option<IpAddr> {
        match self.cidr {
            IpNetwork::V4(net) => Some(IpAddr::V4(net.mask())),
            IpNetwork::V6(_) => None,
        }
    }

    pub fn broadcast(&self) -> IpAddr {
        match self.cidr {
            IpNetwork::V4(net) => IpAddr::V4(net.broadcast()),
            IpNetwork::V6(net) => IpAddr::V6(last_v6(net)),
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if canonical(self.cidr) != self.cidr {
            return Err(CoreError::validation(format!(
                "subnet {}: {} has host bits set",
                self.id, self.cidr
            )));
        }
        if let Some(gateway) = self.gateway_ip {
            if !self.contains(gateway) {
                return Err(CoreError::validation(format!(
                    "subnet {}: gateway {gateway} is outside {}",
                    self.id, self.cidr
                )));
            }
        }
        Ok(())
    }
}

/// Clear host bits.
pub fn canonical(net: IpNetwork) -> IpNetwork {
    IpNetwork::new(net.network(), net.prefix()).unwrap_or(net)
}

/// Whether the prefix covers a single address (/32 or /128).
pub fn is_host_prefix(net: IpNetwork) -> bool {
    match net {
        IpNetwork::V4(n) => n.prefix() == 32,
        IpNetwork::V6(n) => n.prefix() == 128,
    }
}

fn last_v6(net: Ipv6Network) -> Ipv6Addr {
    let host_bits = 128 - u32::from(net.prefix());
    let host_mask = u128::MAX.checked_shr(128 - host_bits).unwrap_or(0);
    Ipv6Addr::from(u128::from(net.network()) | host_mask)
}

// ── IpRange ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum IpRangeKind {
    /// DHCP-assignable pool.
    Dynamic,
    Reserved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    pub id: IpRangeId,
    pub subnet_id: SubnetId,
    #[serde(rename = "type")]
    pub kind: IpRangeKind,
    pub start_ip: IpAddr,
    pub end_ip: IpAddr,
    #[serde(default)]
    pub comment: Option<String>,
}

impl IpRange {
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.start_ip <= ip && ip <= self.end_ip
    }

    pub fn validate(&self, subnet: &Subnet) -> Result<(), CoreError> {
        if IpFamily::of(&self.start_ip) != IpFamily::of(&self.end_ip) {
            return Err(CoreError::validation(format!(
                "range {}: start and end are of different families",
                self.id
            )));
        }
        if self.start_ip > self.end_ip {
            return Err(CoreError::validation(format!(
                "range {}: start {} is after end {}",
                self.id, self.start_ip, self.end_ip
            )));
        }
        if !subnet.contains(self.start_ip) || !subnet.contains(self.end_ip) {
            return Err(CoreError::validation(format!(
                "range {}: {}-{} is not within {}",
                self.id, self.start_ip, self.end_ip, subnet.cidr
            )));
        }
        Ok(())
    }
}

// ── ReservedIp ──────────────────────────────────────────────────────

/// An operator reservation not tied to any interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIp {
    pub id: ReservedIpId,
    pub subnet_id: SubnetId,
    pub ip: IpAddr,
    pub mac: MacAddress,
    #[serde(default)]
    pub comment: Option<String>,
}
