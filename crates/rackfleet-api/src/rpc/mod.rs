//! Persistent, authenticated RPC channel between rack and region.
//!
//! Each side may call the other: the rack authenticates to and registers
//! with the region; the region pushes DHCP configuration to the rack.
//! Frames are JSON text messages over a WebSocket.

pub mod commands;
pub mod connection;
pub mod frame;

pub use commands::RpcCommand;
pub use connection::{ConnectionOptions, Responder, RpcConnection};
pub use frame::Frame;
