//! Rack-side cluster connectivity.
//!
//! [`ClusterClientService`] discovers the region's advertised event-loops,
//! keeps one authenticated and registered channel open to each, persists
//! the addresses it reached and forces DHCP off when the last channel
//! goes away. [`ConnectionChecker`] pings those channels and closes the
//! unresponsive ones so the service redials them.

mod checker;
mod handshake;
mod interval;
mod service;
mod state;

pub use checker::{CHECK_INTERVAL, ConnectionChecker, PING_TIMEOUT};
pub use handshake::{InterfaceSource, StaticInterfaces, authenticate_region};
pub use interval::IntervalPolicy;
pub use service::ClusterClientService;
pub use state::{IDENTITY_FILE, IdentityFile, RPC_STATE_FILE, RpcStateFile, region_url_for};
