use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for the `rackfleet-api` crate.
///
/// Covers every failure mode of the wire layer: endpoint discovery over
/// HTTP, the persistent RPC channel, and payload encoding.
/// `rackfleet-core` maps these into its own error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Unexpected HTTP status from an endpoint-discovery request.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── RPC channel ─────────────────────────────────────────────────
    /// WebSocket connection could not be established.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The channel closed before (or while) the call completed.
    #[error("RPC connection closed")]
    ConnectionClosed,

    /// The remote responder reported a failure.
    #[error("{0}")]
    Remote(RemoteError),

    /// The peer sent something that is not a valid frame.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON (de)serialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Digest computation failed.
    #[error("Digest error: {0}")]
    Digest(String),
}

impl Error {
    /// Returns `true` if the underlying channel is gone and the
    /// connection should be dropped by its owner.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::WebSocketConnect(_))
    }

    /// The remote error kind, if this error came from the peer.
    pub fn remote_kind(&self) -> Option<&str> {
        match self {
            Self::Remote(remote) => Some(remote.kind.as_str()),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Deserialization {
            message: err.to_string(),
            body: String::new(),
        }
    }
}

// ── RemoteError ─────────────────────────────────────────────────────

/// Failure reported by the far side of an RPC call.
///
/// `kind` is a stable machine-readable name (for example
/// `CannotConfigureDHCP` or `CannotRegisterRackController`), `message`
/// is free text suitable for a service-status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Well-known remote error kinds.
pub mod kinds {
    pub const CANNOT_CONFIGURE_DHCP: &str = "CannotConfigureDHCP";
    pub const CANNOT_REGISTER_RACK_CONTROLLER: &str = "CannotRegisterRackController";
    pub const AUTHENTICATION_FAILED: &str = "AuthenticationFailed";
    pub const UNHANDLED_COMMAND: &str = "UnhandledCommand";
    pub const INVALID_ARGUMENTS: &str = "InvalidArguments";
}
