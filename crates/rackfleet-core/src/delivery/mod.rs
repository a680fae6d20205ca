//! DHCP delivery from the region to rack controllers.
//!
//! [`DhcpDelivery::configure_dhcp`] synthesizes a rack's configuration off
//! the async runtime, pushes the IPv4 then the IPv6 payload over the
//! rack's RPC channel and records the outcome in the rack's `dhcpd` /
//! `dhcpd6` service records. [`DhcpDelivery::spawn_watch`] re-delivers to
//! every rack whenever the topology changes, which is also how a failed
//! delivery gets retried. [`DhcpDelivery::validate_dhcp`] sends the same
//! payloads as validate-only calls, optionally with a draft snippet.

mod clients;
mod gate;

use std::sync::Arc;
use std::time::Duration;

use rackfleet_api::IpFamily;
use rackfleet_api::RpcConnection;
use rackfleet_api::dhcp::{DhcpConfig, ValidationIssue};
use rackfleet_api::rpc::commands::{ConfigureDhcpV4, ConfigureDhcpV6, ValidateDhcpV4, ValidateDhcpV6};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use clients::{RackClients, RackConnections};
pub use gate::FamilyGate;

use crate::dhcp::dhcp_configuration;
use crate::error::CoreError;
use crate::model::{DhcpSnippet, Node, NodeId, ServiceRecord, ServiceStatus};
use crate::store::{DataStore, NodeRepository, ServiceStatusRepository};

/// Bound on one family's configure call.
pub const DEFAULT_CONFIGURE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// When off, `configure_dhcp` returns without contacting the rack.
    pub enabled: bool,
    pub timeout: Duration,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_CONFIGURE_TIMEOUT,
        }
    }
}

/// What a rack found wrong with a configuration it was asked to check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DhcpValidation {
    pub v4: Vec<ValidationIssue>,
    pub v6: Vec<ValidationIssue>,
}

impl DhcpValidation {
    pub fn is_sound(&self) -> bool {
        self.v4.is_empty() && self.v6.is_empty()
    }
}

/// Pushes synthesized DHCP configuration to racks. Cheap to clone.
#[derive(Clone)]
pub struct DhcpDelivery {
    inner: Arc<DeliveryInner>,
}

struct DeliveryInner {
    store: Arc<DataStore>,
    clients: Arc<dyn RackClients>,
    gate: FamilyGate,
    options: DeliveryOptions,
}

impl DhcpDelivery {
    pub fn new(store: Arc<DataStore>, clients: Arc<dyn RackClients>, options: DeliveryOptions) -> Self {
        Self {
            inner: Arc::new(DeliveryInner {
                store,
                clients,
                gate: FamilyGate::new(),
                options,
            }),
        }
    }

    /// Configure both DHCP servers on `rack`.
    ///
    /// Fails without touching the service records when the rack cannot
    /// be reached. Otherwise both families are attempted and recorded;
    /// the IPv4 failure is returned in preference to the IPv6 one.
    pub async fn configure_dhcp(&self, rack: NodeId) -> Result<(), CoreError> {
        if !self.inner.options.enabled {
            debug!(rack = %rack, "DHCP delivery disabled");
            return Ok(());
        }
        let node = self
            .inner
            .store
            .node(rack)
            .ok_or_else(|| CoreError::not_found("rack controller", rack))?;
        let client = self.inner.clients.client_for(&node.system_id).await?;

        let store = Arc::clone(&self.inner.store);
        let config = tokio::task::spawn_blocking(move || dhcp_configuration(store.as_ref(), rack, None))
            .await
            .map_err(|e| CoreError::Internal(format!("DHCP synthesis task failed: {e}")))??;

        let v4 = self.deliver(&node, &client, IpFamily::V4, config.v4).await;
        let v6 = self.deliver(&node, &client, IpFamily::V6, config.v6).await;
        v4.and(v6)
    }

    /// Have `rack` check its configuration, with `test_snippet` in place of
    /// the stored snippet of the same id, without applying anything.
    ///
    /// Service records are left alone and the family gate is not taken.
    pub async fn validate_dhcp(
        &self,
        rack: NodeId,
        test_snippet: Option<DhcpSnippet>,
    ) -> Result<DhcpValidation, CoreError> {
        let node = self
            .inner
            .store
            .node(rack)
            .ok_or_else(|| CoreError::not_found("rack controller", rack))?;
        let client = self.inner.clients.client_for(&node.system_id).await?;

        let store = Arc::clone(&self.inner.store);
        let config = tokio::task::spawn_blocking(move || {
            dhcp_configuration(store.as_ref(), rack, test_snippet.as_ref())
        })
        .await
        .map_err(|e| CoreError::Internal(format!("DHCP synthesis task failed: {e}")))??;

        let timeout = self.inner.options.timeout;
        let v4 = client.call_with_timeout(&ValidateDhcpV4(config.v4), timeout).await?;
        let v6 = client.call_with_timeout(&ValidateDhcpV6(config.v6), timeout).await?;
        let validation = DhcpValidation {
            v4: v4.errors.unwrap_or_default(),
            v6: v6.errors.unwrap_or_default(),
        };
        debug!(rack = %node.hostname, sound = validation.is_sound(), "DHCP configuration validated");
        Ok(validation)
    }

    /// Configure every rack controller, logging failures.
    pub async fn configure_all(&self) {
        let racks: Vec<Arc<Node>> = self
            .inner
            .store
            .nodes()
            .into_iter()
            .filter(|node| node.kind.is_rack())
            .collect();
        for rack in racks {
            match self.configure_dhcp(rack.id).await {
                Ok(()) => {}
                Err(CoreError::NoConnectionsAvailable) => {
                    debug!(rack = %rack.hostname, "rack not connected; skipping DHCP delivery");
                }
                Err(e) => warn!(rack = %rack.hostname, error = %e, "DHCP delivery failed"),
            }
        }
    }

    /// Re-deliver to every rack after each topology change until `cancel`.
    pub fn spawn_watch(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let delivery = self.clone();
        let mut changes = self.inner.store.subscribe_changes();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        delivery.configure_all().await;
                    }
                }
            }
            debug!("DHCP delivery watch stopped");
        })
    }

    /// Push one family's payload and record the outcome as the family's
    /// service record.
    ///
    /// `AlreadyInProgress` means another delivery holds the family gate
    /// and will write the record itself, so the record is left untouched
    /// and the error is returned as is.
    async fn deliver(
        &self,
        rack: &Node,
        client: &RpcConnection,
        family: IpFamily,
        config: DhcpConfig,
    ) -> Result<(), CoreError> {
        let running = !config.is_empty();
        let result = self.dispatch(client, family, config).await;
        if matches!(result, Err(CoreError::AlreadyInProgress { .. })) {
            return result;
        }

        let record = match &result {
            Ok(()) => {
                let status = if running {
                    ServiceStatus::Running
                } else {
                    ServiceStatus::Off
                };
                info!(rack = %rack.hostname, %family, %status, "DHCP configured");
                ServiceRecord::new(rack.id, family.service_name(), status, "")
            }
            Err(e) => {
                warn!(rack = %rack.hostname, %family, error = %e, "DHCP configuration failed");
                ServiceRecord::new(rack.id, family.service_name(), ServiceStatus::Dead, failure_message(e))
            }
        };
        self.inner.store.save_service(record);
        result
    }

    async fn dispatch(&self, client: &RpcConnection, family: IpFamily, config: DhcpConfig) -> Result<(), CoreError> {
        let _permit = self.inner.gate.try_acquire(family)?;
        let timeout = self.inner.options.timeout;

        let call = async {
            match family {
                IpFamily::V4 => client.call_with_timeout(&ConfigureDhcpV4(config), timeout).await,
                IpFamily::V6 => client.call_with_timeout(&ConfigureDhcpV6(config), timeout).await,
            }
        };
        let service = family.service_name().to_owned();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(_ack)) => Ok(()),
            Ok(Err(e)) => {
                if e.is_closed() {
                    warn!(eventloop = client.eventloop(), "RPC channel closed mid-call; dropping it");
                    client.close();
                }
                match e {
                    rackfleet_api::Error::Remote(remote) => Err(CoreError::DeliveryFailed {
                        service,
                        message: remote.message,
                    }),
                    rackfleet_api::Error::Timeout { .. } => Err(CoreError::DeliveryFailed {
                        service,
                        message: "timed out".into(),
                    }),
                    other => Err(other.into()),
                }
            }
            Err(_) => Err(CoreError::DeliveryFailed {
                service,
                message: "timed out".into(),
            }),
        }
    }
}

/// Text for a DEAD service record.
fn failure_message(err: &CoreError) -> String {
    match err {
        CoreError::DeliveryFailed { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
