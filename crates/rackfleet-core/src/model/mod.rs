// ── Domain model ──
//
// Plain data for the topology graph. Invariant checks live beside the
// types; nothing here performs I/O.

pub mod address;
pub mod fabric;
pub mod ids;
pub mod interface;
pub mod node;
pub mod service;
pub mod settings;
pub mod snippet;
pub mod subnet;

pub use address::{AllocType, StaticAddress};
pub use fabric::{DEFAULT_MTU, DEFAULT_VID, Fabric, MAX_VID, Vlan};
pub use ids::{
    AddressId, FabricId, InterfaceId, IpRangeId, MacAddress, NodeId, ReservedIpId, SnippetId,
    SpaceId, SubnetId, VlanId,
};
pub use interface::{Interface, InterfaceKind};
pub use node::{Node, NodeKind};
pub use service::{ServiceRecord, ServiceStatus};
pub use settings::NetworkSettings;
pub use snippet::{DhcpSnippet, SnippetScope};
pub use subnet::{IpRange, IpRangeKind, ReservedIp, Subnet};
