// ── Region-side view of connected racks ──

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use rackfleet_api::RpcConnection;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::CoreError;

/// Source of RPC channels to rack controllers.
#[async_trait]
pub trait RackClients: Send + Sync {
    /// An open channel to the rack with `system_id`.
    async fn client_for(&self, system_id: &str) -> Result<Arc<RpcConnection>, CoreError>;
}

/// Registered rack channels keyed by system id.
///
/// Channels leave the registry on their own once they close.
#[derive(Debug, Default)]
pub struct RackConnections {
    racks: DashMap<String, Vec<Arc<RpcConnection>>>,
}

impl RackConnections {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Track `connection` for `system_id` until it closes.
    pub fn register(self: &Arc<Self>, system_id: &str, connection: Arc<RpcConnection>) {
        let mut entry = self.racks.entry(system_id.to_owned()).or_default();
        if entry.iter().any(|known| known.id() == connection.id()) {
            return;
        }
        entry.push(Arc::clone(&connection));
        drop(entry);
        info!(system_id, eventloop = connection.eventloop(), "rack connected");

        let registry = Arc::downgrade(self);
        let system_id = system_id.to_owned();
        tokio::spawn(async move {
            connection.closed().await;
            if let Some(registry) = registry.upgrade() {
                registry.remove(&system_id, &connection);
            }
        });
    }

    fn remove(&self, system_id: &str, connection: &RpcConnection) {
        let emptied = self.racks.get_mut(system_id).is_some_and(|mut entry| {
            entry.retain(|known| known.id() != connection.id());
            entry.is_empty()
        });
        if emptied {
            self.racks.remove_if(system_id, |_, conns| conns.is_empty());
        }
        debug!(system_id, "rack connection removed");
    }

    /// Open channels to `system_id`.
    pub fn connections(&self, system_id: &str) -> Vec<Arc<RpcConnection>> {
        self.racks
            .get(system_id)
            .map(|entry| entry.iter().filter(|c| !c.is_closed()).cloned().collect())
            .unwrap_or_default()
    }

    /// System ids with at least one open channel, sorted.
    pub fn connected_racks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .racks
            .iter()
            .filter(|entry| entry.value().iter().any(|c| !c.is_closed()))
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RackClients for RackConnections {
    async fn client_for(&self, system_id: &str) -> Result<Arc<RpcConnection>, CoreError> {
        self.connections(system_id)
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(CoreError::NoConnectionsAvailable)
    }
}
