// ── IP address assignments ──

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AddressId, InterfaceId, SubnetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AllocType {
    /// Allocated by the system; may be temporary.
    Auto,
    /// Set by an administrator or a static link.
    Sticky,
    UserReserved,
    /// Configured by DHCP; the lease IP lives on a companion `Discovered` row.
    Dhcp,
    /// Observed on the wire, not user managed.
    Discovered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticAddress {
    pub id: AddressId,
    pub interface_id: InterfaceId,
    pub alloc_type: AllocType,
    #[serde(default)]
    pub ip: Option<IpAddr>,
    #[serde(default)]
    pub subnet_id: Option<SubnetId>,
    /// Set on temporary `Auto` allocations.
    #[serde(default)]
    pub temp_expires_on: Option<DateTime<Utc>>,
}

impl StaticAddress {
    pub fn new(id: AddressId, interface_id: InterfaceId, alloc_type: AllocType) -> Self {
        Self {
            id,
            interface_id,
            alloc_type,
            ip: None,
            subnet_id: None,
            temp_expires_on: None,
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temp_expires_on.is_some()
    }

    pub fn is_sticky_or_auto(&self) -> bool {
        matches!(self.alloc_type, AllocType::Sticky | AllocType::Auto)
    }

    /// Addresses that warrant a DHCP host reservation.
    pub fn is_reservable(&self) -> bool {
        matches!(
            self.alloc_type,
            AllocType::Auto | AllocType::Sticky | AllocType::UserReserved
        ) && self.ip.is_some()
            && !self.is_temporary()
    }
}
