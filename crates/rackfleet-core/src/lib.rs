//! Topology, reconciliation, DHCP synthesis and cluster connectivity for
//! rackfleet rack and region controllers.
//!
//! - **Topology** ([`model`], [`store`]): fabrics, VLANs, subnets,
//!   interfaces, addresses and nodes behind one repository trait per
//!   entity. [`DataStore`] is the in-memory implementation; every
//!   mutation bumps a `watch` counter that drives re-delivery.
//!
//! - **[`reconcile`]**: merges a controller's reported interfaces into the
//!   topology in dependency order, inferring VLANs and cascading deletes.
//!
//! - **[`dhcp`]**: synthesizes the per-rack, per-family DHCP
//!   configuration: shared networks, pools with failover, hosts, DNS and
//!   NTP servers, snippets.
//!
//! - **[`DhcpDelivery`]**: pushes that configuration to racks one family
//!   at a time and records the outcome as `dhcpd` / `dhcpd6` service
//!   status.
//!
//! - **Rack side** ([`rack`], [`cluster`]): answers region requests and
//!   applies DHCP locally; keeps registered channels open to every
//!   advertised region event-loop and checks them.
//!
//! - **Region side** ([`region`]): answers the rack handshake and
//!   registers racks.

pub mod cluster;
pub mod config;
pub mod delivery;
pub mod dhcp;
pub mod error;
pub mod model;
pub mod rack;
pub mod reconcile;
pub mod region;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cluster::{ClusterClientService, ConnectionChecker, IntervalPolicy};
pub use config::{ClusterConfig, SharedSecret};
pub use delivery::{DeliveryOptions, DhcpDelivery, DhcpValidation, RackClients, RackConnections};
pub use dhcp::{RackDhcpConfiguration, dhcp_configuration};
pub use error::CoreError;
pub use rack::{DhcpServer, FileDhcpServer, RackResponder, ServiceMonitor};
pub use reconcile::{ReconcileOutcome, reconcile, reconcile_with_hints};
pub use region::{Region, RegionResponder};
pub use store::{DataStore, Topology, TopologySnapshot};

pub use rackfleet_api::{TlsMode, TransportConfig};
