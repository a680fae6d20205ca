// ── Core identity types ──
//
// Every topology entity is keyed by a store-assigned integer. Each entity
// gets its own newtype so a `VlanId` can never be passed where a
// `SubnetId` is expected.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident;)+) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    )+};
}

entity_id! {
    /// Identifier of a [`Fabric`](super::Fabric).
    FabricId;
    /// Identifier of a [`Vlan`](super::Vlan).
    VlanId;
    /// Identifier of a [`Subnet`](super::Subnet).
    SubnetId;
    /// Identifier of an [`IpRange`](super::IpRange).
    IpRangeId;
    /// Identifier of a [`ReservedIp`](super::ReservedIp).
    ReservedIpId;
    /// Identifier of an [`Interface`](super::Interface).
    InterfaceId;
    /// Identifier of a [`StaticAddress`](super::StaticAddress).
    AddressId;
    /// Identifier of a [`Node`](super::Node).
    NodeId;
    /// Identifier of a [`DhcpSnippet`](super::DhcpSnippet).
    SnippetId;
    /// Identifier of a routing space.
    SpaceId;
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address.
    /// Accepts colon-separated, dash-separated, or bare hex.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let digits: String = raw
            .trim()
            .chars()
            .filter(|c| *c != ':' && *c != '-' && *c != '.')
            .collect::<String>()
            .to_ascii_lowercase();

        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::validation(format!("invalid MAC address '{raw}'")));
        }

        let octets: Vec<&str> = (0..6).filter_map(|i| digits.get(i * 2..i * 2 + 2)).collect();
        Ok(Self(octets.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = CoreError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> Self {
        mac.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn mac_normalization() {
        let mac = MacAddress::parse("AA-BB-CC-DD-EE-FF").unwrap();
        assert_eq!(mac.as_str(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(MacAddress::parse("aabbccddeeff").unwrap(), mac);
    }

    #[test]
    fn mac_rejects_garbage() {
        assert!(MacAddress::parse("not-a-mac").is_err());
        assert!(MacAddress::parse("aa:bb:cc:dd:ee").is_err());
    }

    #[test]
    fn mac_serde_validates() {
        let mac: MacAddress = serde_json::from_str("\"00:16:3E:00:00:01\"").unwrap();
        assert_eq!(mac.to_string(), "00:16:3e:00:00:01");
        assert!(serde_json::from_str::<MacAddress>("\"zz\"").is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        assert_eq!(serde_json::to_string(&VlanId(7)).unwrap(), "7");
        assert_eq!(VlanId::from(7).to_string(), "7");
    }
}
