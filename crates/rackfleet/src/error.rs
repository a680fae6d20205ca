//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors
//! with actionable help text.

use miette::Diagnostic;
use rackfleet_config::ConfigError;
use rackfleet_core::CoreError;
use thiserror::Error;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connectivity ─────────────────────────────────────────────────

    #[error("Could not connect to {url}: {reason}")]
    #[diagnostic(
        code(rackfleet::connection_failed),
        help(
            "Check that the region is running and reachable.\n\
             Configured region URLs: rackfleet config show"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("No region connection is available")]
    #[diagnostic(
        code(rackfleet::no_connections),
        help("Wait for the rack to register, or check region_urls in: rackfleet config show")
    )]
    NoConnections,

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(rackfleet::auth_failed),
        help(
            "The rack and region must share the same secret.\n\
             Run: rackfleet config set-secret"
        )
    )]
    AuthFailed { message: String },

    #[error("No shared secret configured")]
    #[diagnostic(
        code(rackfleet::no_secret),
        help(
            "Set RACKFLEET_SECRET, run: rackfleet config set-secret\n\
             or write the hex secret to {path}"
        )
    )]
    NoSecret { path: String },

    #[error("Registration rejected: {message}")]
    #[diagnostic(
        code(rackfleet::registration_rejected),
        help("The region refused to register this rack. Check the region logs.")
    )]
    RegistrationRejected { message: String },

    // ── Topology ─────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(rackfleet::not_found),
        help("Nodes are matched by system id first, then hostname.")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
    },

    #[error("Conflict: {message}")]
    #[diagnostic(code(rackfleet::conflict))]
    Conflict { message: String },

    #[error("{service} configuration failed: {message}")]
    #[diagnostic(code(rackfleet::delivery_failed))]
    DeliveryFailed { service: String, message: String },

    #[error("Remote call failed ({kind}): {message}")]
    #[diagnostic(code(rackfleet::remote))]
    Remote { kind: String, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(rackfleet::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(rackfleet::config),
        help("Inspect the configuration with: rackfleet config show")
    )]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Operation timed out after {seconds}s")]
    #[diagnostic(code(rackfleet::timeout))]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON in {path}: {source}")]
    #[diagnostic(code(rackfleet::json), help("Check the file contents and try again."))]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not render output: {0}")]
    #[diagnostic(code(rackfleet::render))]
    Render(String),

    #[error("Internal error: {0}")]
    #[diagnostic(code(rackfleet::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::NoConnections => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoSecret { .. } => exit_code::AUTH,
            Self::RegistrationRejected { .. } => exit_code::PERMISSION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Json { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationFailed { message } => CliError::Validation {
                field: "topology".into(),
                reason: message,
            },
            CoreError::StateConflict { message } => CliError::Conflict { message },
            CoreError::AlreadyInProgress { operation } => CliError::Conflict {
                message: format!("{operation} is already in progress"),
            },
            CoreError::NotFound {
                entity_type,
                identifier,
            } => CliError::NotFound {
                resource_type: entity_type,
                identifier,
            },
            CoreError::DeliveryFailed { service, message } => {
                CliError::DeliveryFailed { service, message }
            }
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::NoConnectionsAvailable => CliError::NoConnections,
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::RegistrationFailed { message } => CliError::RegistrationRejected { message },
            CoreError::Remote { kind, message } => CliError::Remote { kind, message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoSecret { path } => CliError::NoSecret { path },
            ConfigError::InvalidSecret(e) => CliError::Validation {
                field: "secret".into(),
                reason: format!("not valid hex: {e}"),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_errors_keep_their_exit_codes() {
        let cases = [
            (CoreError::not_found("node", "rack9"), exit_code::NOT_FOUND),
            (CoreError::conflict("duplicate MAC"), exit_code::CONFLICT),
            (CoreError::NoConnectionsAvailable, exit_code::CONNECTION),
            (CoreError::Timeout { timeout_secs: 30 }, exit_code::TIMEOUT),
            (
                CoreError::AuthenticationFailed {
                    message: "digest mismatch".into(),
                },
                exit_code::AUTH,
            ),
            (
                CoreError::RegistrationFailed {
                    message: "no MAC".into(),
                },
                exit_code::PERMISSION,
            ),
            (CoreError::validation("bad report"), exit_code::USAGE),
            (CoreError::Internal("boom".into()), exit_code::GENERAL),
        ];
        for (core, code) in cases {
            let rendered = core.to_string();
            assert_eq!(CliError::from(core).exit_code(), code, "{rendered}");
        }
    }

    #[test]
    fn missing_secret_is_an_auth_error() {
        let err = CliError::from(ConfigError::NoSecret {
            path: "/var/lib/rackfleet/secret".into(),
        });
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }
}
