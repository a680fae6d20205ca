//! The rack controller's side of the RPC channel.
//!
//! [`RackResponder`] answers what the region asks of a rack: who it is,
//! proof that it holds the shared secret, liveness, and DHCP
//! configuration to apply or merely validate. Applying goes through the
//! same per-family single-flight gate and timeout as the region's
//! delivery, so two configurations for one family never overlap.

mod monitor;
mod server;

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use rackfleet_api::auth::{calculate_digest, random_nonce};
use rackfleet_api::dhcp::DhcpConfig;
use rackfleet_api::error::kinds;
use rackfleet_api::rpc::commands::{
    Ack, AuthResponse, Authenticate, ConfigureDhcpV4, ConfigureDhcpV6, Identify, Identity, Ping,
    ValidateDhcpV4, ValidateDhcpV6, ValidationReport,
};
use rackfleet_api::rpc::connection::{decode_args, encode_reply, unhandled};
use rackfleet_api::{IpFamily, RemoteError, Responder, RpcCommand};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use monitor::{DhcpState, ServiceMonitor};
pub use server::{DhcpServer, FileDhcpServer, validate_config};

use crate::config::SharedSecret;
use crate::delivery::FamilyGate;
use crate::error::CoreError;

pub struct RackResponder {
    ident: ArcSwap<String>,
    secret: SharedSecret,
    monitor: Arc<ServiceMonitor>,
    gate: FamilyGate,
    timeout: Duration,
}

impl RackResponder {
    pub fn new(ident: impl Into<String>, secret: SharedSecret, monitor: Arc<ServiceMonitor>, timeout: Duration) -> Self {
        Self {
            ident: ArcSwap::from_pointee(ident.into()),
            secret,
            monitor,
            gate: FamilyGate::new(),
            timeout,
        }
    }

    /// Answer `Identify` with the region-assigned system id from now on.
    pub fn set_ident(&self, ident: impl Into<String>) {
        self.ident.store(Arc::new(ident.into()));
    }

    pub fn ident(&self) -> Arc<String> {
        self.ident.load_full()
    }

    pub fn monitor(&self) -> &Arc<ServiceMonitor> {
        &self.monitor
    }

    fn authenticate(&self, request: &Authenticate) -> Result<AuthResponse, RemoteError> {
        let salt = random_nonce();
        let digest = calculate_digest(self.secret.expose(), &request.message, &salt)
            .map_err(|e| RemoteError::new(kinds::AUTHENTICATION_FAILED, e.to_string()))?;
        Ok(AuthResponse { digest, salt })
    }

    /// Apply `config`, or stop the server when it carries no networks.
    pub async fn configure(&self, family: IpFamily, config: DhcpConfig) -> Result<(), CoreError> {
        let _permit = self.gate.try_acquire(family)?;
        let server = Arc::clone(self.monitor.server());
        let work = async {
            if config.is_empty() {
                server.stop(family).await?;
                Ok(false)
            } else {
                server.apply(family, &config).await?;
                Ok::<_, CoreError>(true)
            }
        };

        let running = tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| CoreError::DeliveryFailed {
                service: family.service_name().into(),
                message: "timed out".into(),
            })??;
        self.monitor.mark(family, running);
        info!(%family, running, "DHCP configuration applied");
        Ok(())
    }

    async fn respond_configure(&self, family: IpFamily, config: DhcpConfig) -> Result<Value, RemoteError> {
        match self.configure(family, config).await {
            Ok(()) => encode_reply(&Ack {}),
            Err(e) => {
                warn!(%family, error = %e, "refusing DHCP configuration");
                Err(RemoteError::new(kinds::CANNOT_CONFIGURE_DHCP, e.to_string()))
            }
        }
    }

    async fn respond_validate(&self, family: IpFamily, config: &DhcpConfig) -> Result<Value, RemoteError> {
        let issues = self
            .monitor
            .server()
            .validate(family, config)
            .await
            .map_err(|e| RemoteError::new(kinds::CANNOT_CONFIGURE_DHCP, e.to_string()))?;
        let report = ValidationReport {
            errors: if issues.is_empty() { None } else { Some(issues) },
        };
        encode_reply(&report)
    }
}

#[async_trait]
impl Responder for RackResponder {
    async fn respond(&self, command: &str, args: Value) -> Result<Value, RemoteError> {
        debug!(command, "rack request");
        match command {
            Ping::NAME => encode_reply(&Ack {}),
            Identify::NAME => encode_reply(&Identity {
                ident: self.ident().as_ref().clone(),
            }),
            Authenticate::NAME => {
                let request: Authenticate = decode_args(args)?;
                encode_reply(&self.authenticate(&request)?)
            }
            ConfigureDhcpV4::NAME => {
                let ConfigureDhcpV4(config) = decode_args(args)?;
                self.respond_configure(IpFamily::V4, config).await
            }
            ConfigureDhcpV6::NAME => {
                let ConfigureDhcpV6(config) = decode_args(args)?;
                self.respond_configure(IpFamily::V6, config).await
            }
            ValidateDhcpV4::NAME => {
                let ValidateDhcpV4(config) = decode_args(args)?;
                self.respond_validate(IpFamily::V4, &config).await
            }
            ValidateDhcpV6::NAME => {
                let ValidateDhcpV6(config) = decode_args(args)?;
                self.respond_validate(IpFamily::V6, &config).await
            }
            other => Err(unhandled(other)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rackfleet_api::auth::verify_digest;

    fn responder(dir: &std::path::Path) -> RackResponder {
        let monitor = Arc::new(ServiceMonitor::new(Arc::new(FileDhcpServer::new(dir))));
        RackResponder::new("rack-abc", SharedSecret::new(b"s3cret".to_vec()), monitor, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn identifies_and_authenticates() {
        let dir = tempfile::tempdir().unwrap();
        let rack = responder(dir.path());

        let ident = rack.respond(Identify::NAME, serde_json::json!({})).await.unwrap();
        assert_eq!(ident, serde_json::json!({"ident": "rack-abc"}));
        rack.set_ident("sys-1");
        assert_eq!(rack.ident().as_str(), "sys-1");

        let message = random_nonce();
        let args = serde_json::to_value(Authenticate { message: message.clone() }).unwrap();
        let reply: AuthResponse =
            serde_json::from_value(rack.respond(Authenticate::NAME, args).await.unwrap()).unwrap();
        assert!(verify_digest(b"s3cret", &message, &reply.salt, &reply.digest));
        assert!(!verify_digest(b"other", &message, &reply.salt, &reply.digest));
    }

    #[tokio::test]
    async fn empty_config_turns_family_off() {
        let dir = tempfile::tempdir().unwrap();
        let rack = responder(dir.path());
        rack.monitor().mark(IpFamily::V6, true);

        rack.configure(IpFamily::V6, DhcpConfig::default()).await.unwrap();
        assert!(!rack.monitor().state().v6);
    }

    #[tokio::test]
    async fn concurrent_configure_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let rack = responder(dir.path());
        let _held = rack.gate.try_acquire(IpFamily::V4).unwrap();

        let err = rack
            .respond(ConfigureDhcpV4::NAME, serde_json::to_value(DhcpConfig::default()).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.kind, kinds::CANNOT_CONFIGURE_DHCP);
        assert!(err.message.contains("already in progress"));
    }

    #[tokio::test]
    async fn unknown_commands_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = responder(dir.path())
            .respond("Frobnicate", Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.kind, kinds::UNHANDLED_COMMAND);
    }
}
