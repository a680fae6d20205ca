// rackfleet-api: wire protocol and RPC transport between rack and region controllers

pub mod auth;
pub mod dhcp;
pub mod endpoints;
pub mod error;
pub mod interfaces;
pub mod rpc;
pub mod transport;

pub use dhcp::IpFamily;
pub use endpoints::{EndpointClient, RpcInfo};
pub use error::{Error, RemoteError};
pub use rpc::{ConnectionOptions, Responder, RpcCommand, RpcConnection};
pub use transport::{TlsMode, TransportConfig};
