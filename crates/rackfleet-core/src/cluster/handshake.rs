// ── Rack to region handshake ──
//
// A fresh channel is only trusted once the region proves it holds the
// shared secret; the rack then registers itself and learns the identity
// the region knows it by.

use async_trait::async_trait;
use rackfleet_api::RpcConnection;
use rackfleet_api::auth::{random_nonce, verify_digest};
use rackfleet_api::interfaces::InterfaceReport;
use rackfleet_api::rpc::commands::{Authenticate, RegisterRackController, Registration};
use tracing::{info, warn};

use crate::config::SharedSecret;
use crate::error::CoreError;

/// Where the interface inventory sent at registration comes from.
#[async_trait]
pub trait InterfaceSource: Send + Sync {
    async fn interfaces(&self) -> Result<InterfaceReport, CoreError>;
}

/// A fixed inventory, e.g. loaded from a file.
#[derive(Debug, Clone, Default)]
pub struct StaticInterfaces(pub InterfaceReport);

#[async_trait]
impl InterfaceSource for StaticInterfaces {
    async fn interfaces(&self) -> Result<InterfaceReport, CoreError> {
        Ok(self.0.clone())
    }
}

/// Challenge the region with a fresh nonce and check its digest.
pub async fn authenticate_region(connection: &RpcConnection, secret: &SharedSecret) -> Result<(), CoreError> {
    let message = random_nonce();
    let reply = connection.call(&Authenticate { message: message.clone() }).await?;
    if verify_digest(secret.expose(), &message, &reply.salt, &reply.digest) {
        info!(eventloop = connection.eventloop(), "event-loop authenticated");
        Ok(())
    } else {
        warn!(eventloop = connection.eventloop(), "event-loop failed authentication");
        Err(CoreError::AuthenticationFailed {
            message: format!("event-loop {} failed authentication", connection.eventloop()),
        })
    }
}

/// Authenticate the region, then register with it.
pub async fn perform(
    connection: &RpcConnection,
    secret: &SharedSecret,
    request: &RegisterRackController,
) -> Result<Registration, CoreError> {
    authenticate_region(connection, secret).await?;
    match connection.call(request).await {
        Ok(registration) => {
            let version = if registration.version.is_empty() {
                "unknown version"
            } else {
                registration.version.as_str()
            };
            info!(
                system_id = %registration.system_id,
                eventloop = connection.eventloop(),
                version,
                "rack controller registered"
            );
            Ok(registration)
        }
        Err(e) => {
            let err = CoreError::from(e);
            if matches!(err, CoreError::RegistrationFailed { .. }) {
                warn!(eventloop = connection.eventloop(), "rack controller rejected by the region");
            }
            Err(err)
        }
    }
}
