// ── Core error types ──
//
// Domain errors for rackfleet-core. Transport details stay in
// `rackfleet_api::Error`; the `From` impl below folds them into the
// taxonomy callers reason about.

use rackfleet_api::error::kinds;
use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("State conflict: {message}")]
    StateConflict { message: String },

    #[error("Entity not found: {entity_type} {identifier}")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    // ── Delivery errors ──────────────────────────────────────────────
    #[error("{service} configuration failed: {message}")]
    DeliveryFailed { service: String, message: String },

    #[error("{operation} is already in progress")]
    AlreadyInProgress { operation: String },

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Connectivity errors ──────────────────────────────────────────
    #[error("No connections available")]
    NoConnectionsAvailable,

    #[error("Cannot connect to {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Registration rejected: {message}")]
    RegistrationFailed { message: String },

    #[error("Remote call failed ({kind}): {message}")]
    Remote { kind: String, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::StateConflict {
            message: message.into(),
        }
    }

    pub fn not_found(entity_type: &str, identifier: impl ToString) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            identifier: identifier.to_string(),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<rackfleet_api::Error> for CoreError {
    fn from(err: rackfleet_api::Error) -> Self {
        use rackfleet_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else {
                    CoreError::ConnectionFailed {
                        url: e.url().map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Http { status, url } => CoreError::ConnectionFailed {
                url,
                reason: format!("HTTP {status}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            Api::ConnectionClosed => CoreError::ConnectionFailed {
                url: String::new(),
                reason: "RPC connection closed".into(),
            },
            Api::Remote(remote) => match remote.kind.as_str() {
                kinds::AUTHENTICATION_FAILED => CoreError::AuthenticationFailed {
                    message: remote.message,
                },
                kinds::CANNOT_REGISTER_RACK_CONTROLLER => CoreError::RegistrationFailed {
                    message: remote.message,
                },
                _ => CoreError::Remote {
                    kind: remote.kind,
                    message: remote.message,
                },
            },
            Api::Protocol(msg) => CoreError::Internal(format!("Protocol error: {msg}")),
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            Api::Digest(msg) => CoreError::AuthenticationFailed { message: msg },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rackfleet_api::RemoteError;

    #[test]
    fn remote_kinds_map_to_taxonomy() {
        let err: CoreError = rackfleet_api::Error::Remote(RemoteError::new(
            kinds::CANNOT_REGISTER_RACK_CONTROLLER,
            "unknown rack",
        ))
        .into();
        assert!(matches!(err, CoreError::RegistrationFailed { ref message } if message == "unknown rack"));

        let err: CoreError = rackfleet_api::Error::Remote(RemoteError::new(
            kinds::CANNOT_CONFIGURE_DHCP,
            "bad config",
        ))
        .into();
        assert!(matches!(err, CoreError::Remote { ref kind, .. } if kind == "CannotConfigureDHCP"));
    }

    #[test]
    fn closed_channel_is_connection_failure() {
        let err: CoreError = rackfleet_api::Error::ConnectionClosed.into();
        assert!(matches!(err, CoreError::ConnectionFailed { .. }));
    }
}
