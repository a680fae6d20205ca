//! The region controller's side of the RPC channel.
//!
//! A [`Region`] owns what every region event-loop shares: the topology
//! store, the registry of connected racks and the cluster secret. Each
//! accepted channel gets its own [`RegionResponder`], which answers the
//! rack's handshake and, on registration, merges the rack's interfaces
//! into the topology and makes the channel available for DHCP delivery.

use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use rackfleet_api::auth::{calculate_digest, random_nonce};
use rackfleet_api::error::kinds;
use rackfleet_api::rpc::commands::{
    Ack, AuthResponse, Authenticate, Identify, Identity, Ping, RegisterRackController, Registration,
};
use rackfleet_api::rpc::connection::{decode_args, encode_reply, unhandled};
use rackfleet_api::{ConnectionOptions, RemoteError, Responder, RpcCommand, RpcConnection};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::SharedSecret;
use crate::delivery::RackConnections;
use crate::error::CoreError;
use crate::model::{Node, NodeId, NodeKind};
use crate::reconcile::{ReconcileOutcome, reconcile_with_hints, validate_report};
use crate::store::{DataStore, NodeRepository, Topology};

const SYSTEM_ID_LEN: usize = 6;

/// State shared by every region event-loop.
pub struct Region {
    store: Arc<DataStore>,
    racks: Arc<RackConnections>,
    secret: SharedSecret,
    eventloop: String,
    cluster_uuid: String,
    version: String,
}

impl Region {
    pub fn new(store: Arc<DataStore>, secret: SharedSecret, eventloop: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            store,
            racks: RackConnections::new(),
            secret,
            eventloop: eventloop.into(),
            cluster_uuid: uuid::Uuid::new_v4().to_string(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn racks(&self) -> &Arc<RackConnections> {
        &self.racks
    }

    pub fn cluster_uuid(&self) -> &str {
        &self.cluster_uuid
    }

    /// Responder for one freshly accepted channel.
    pub fn responder(self: &Arc<Self>) -> Arc<RegionResponder> {
        Arc::new(RegionResponder {
            region: Arc::clone(self),
            connection: OnceLock::new(),
        })
    }

    /// An in-process channel to a rack answering with `rack`, returned as
    /// `(rack side, region side)`.
    pub async fn connect_loopback(
        self: &Arc<Self>,
        rack: Arc<dyn Responder>,
        options: ConnectionOptions,
    ) -> (Arc<RpcConnection>, Arc<RpcConnection>) {
        let responder = self.responder();
        let (rack_side, region_side) = RpcConnection::loopback_pair(
            rack,
            Arc::clone(&responder) as Arc<dyn Responder>,
            self.eventloop.clone(),
            options,
        )
        .await;
        responder.attach(&region_side);
        (rack_side, region_side)
    }

    /// Find or create the rack node for `request`, then merge its
    /// interfaces.
    pub fn register_rack(
        &self,
        request: &RegisterRackController,
    ) -> Result<(Arc<Node>, ReconcileOutcome), CoreError> {
        let store = self.store.as_ref();
        validate_report(&request.interfaces)?;
        let known = request
            .system_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| store.node_by_system_id(id))
            .or_else(|| store.node_by_hostname(&request.hostname));

        let node = match known {
            Some(node) => {
                let kind = match node.kind {
                    NodeKind::RegionController | NodeKind::RegionAndRackController => {
                        NodeKind::RegionAndRackController
                    }
                    NodeKind::Machine | NodeKind::Device | NodeKind::RackController => {
                        NodeKind::RackController
                    }
                };
                let updated = Node {
                    kind,
                    hostname: request.hostname.clone(),
                    version: Some(request.version.clone()),
                    ..node.as_ref().clone()
                };
                if updated != *node {
                    store.save_node(updated);
                }
                node.id
            }
            None => {
                let id = NodeId(store.next_id());
                let system_id = fresh_system_id(store);
                info!(%system_id, hostname = %request.hostname, "creating rack controller");
                store.save_node(Node {
                    id,
                    system_id,
                    hostname: request.hostname.clone(),
                    kind: NodeKind::RackController,
                    version: Some(request.version.clone()),
                });
                id
            }
        };

        let hints = request.hints.as_deref().unwrap_or_default();
        let outcome = reconcile_with_hints(store, node, &request.interfaces, hints)?;
        let node = store
            .node(node)
            .ok_or_else(|| CoreError::not_found("rack controller", node))?;
        Ok((node, outcome))
    }
}

fn fresh_system_id(store: &DataStore) -> String {
    loop {
        let candidate: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SYSTEM_ID_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect();
        if store.node_by_system_id(&candidate).is_none() {
            return candidate;
        }
    }
}

// ── RegionResponder ──────────────────────────────────────────────────

pub struct RegionResponder {
    region: Arc<Region>,
    connection: OnceLock<Weak<RpcConnection>>,
}

impl RegionResponder {
    /// Bind this responder to the channel it answers on, so a
    /// registered rack can be reached over it.
    pub fn attach(&self, connection: &Arc<RpcConnection>) {
        if self.connection.set(Arc::downgrade(connection)).is_err() {
            debug!("responder already attached");
        }
    }

    async fn register(&self, request: RegisterRackController) -> Result<Registration, CoreError> {
        let region = Arc::clone(&self.region);
        let (node, outcome) = tokio::task::spawn_blocking(move || region.register_rack(&request))
            .await
            .map_err(|e| CoreError::Internal(format!("registration task failed: {e}")))??;

        if !outcome.is_noop() {
            info!(
                system_id = %node.system_id,
                created = outcome.created.len(),
                updated = outcome.updated.len(),
                deleted = outcome.deleted.len(),
                "rack interfaces updated"
            );
        }
        match self.connection.get().and_then(Weak::upgrade) {
            Some(connection) => self.region.racks.register(&node.system_id, connection),
            None => debug!(system_id = %node.system_id, "registered over an unattached channel"),
        }

        Ok(Registration {
            system_id: node.system_id.clone(),
            uuid: self.region.cluster_uuid.clone(),
            version: self.region.version.clone(),
        })
    }
}

#[async_trait]
impl Responder for RegionResponder {
    async fn respond(&self, command: &str, args: Value) -> Result<Value, RemoteError> {
        match command {
            Ping::NAME => encode_reply(&Ack {}),
            Identify::NAME => encode_reply(&Identity {
                ident: self.region.eventloop.clone(),
            }),
            Authenticate::NAME => {
                let request: Authenticate = decode_args(args)?;
                let salt = random_nonce();
                let digest = calculate_digest(self.region.secret.expose(), &request.message, &salt)
                    .map_err(|e| RemoteError::new(kinds::AUTHENTICATION_FAILED, e.to_string()))?;
                encode_reply(&AuthResponse { digest, salt })
            }
            RegisterRackController::NAME => {
                let request: RegisterRackController = decode_args(args)?;
                let hostname = request.hostname.clone();
                match self.register(request).await {
                    Ok(registration) => encode_reply(&registration),
                    Err(e) => {
                        warn!(%hostname, error = %e, "rack registration rejected");
                        Err(RemoteError::new(kinds::CANNOT_REGISTER_RACK_CONTROLLER, e.to_string()))
                    }
                }
            }
            other => Err(unhandled(other)),
        }
    }
}
