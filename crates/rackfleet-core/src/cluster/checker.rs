// ── Cluster connection checker ──

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rackfleet_api::RpcConnection;
use rackfleet_api::rpc::commands::Ping;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::service::ClusterClientService;

pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Pings every open channel on a timer and closes the ones that fail,
/// leaving reconnection to the connection service.
#[derive(Clone)]
pub struct ConnectionChecker {
    service: ClusterClientService,
    interval: Duration,
    timeout: Duration,
}

impl ConnectionChecker {
    pub fn new(service: ClusterClientService) -> Self {
        Self {
            service,
            interval: CHECK_INTERVAL,
            timeout: PING_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timing(mut self, interval: Duration, timeout: Duration) -> Self {
        self.interval = interval;
        self.timeout = timeout;
        self
    }

    /// Ping all channels concurrently. Returns how many were closed.
    pub async fn check(&self) -> usize {
        let results = join_all(
            self.service
                .get_all_clients()
                .into_iter()
                .map(|conn| ping(conn, self.timeout)),
        )
        .await;
        results.into_iter().filter(|alive| !alive).count()
    }

    pub fn spawn(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let checker = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(checker.interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let closed = checker.check().await;
                        if closed > 0 {
                            debug!(closed, "closed unresponsive connections");
                        }
                    }
                }
            }
        })
    }
}

async fn ping(conn: Arc<RpcConnection>, timeout: Duration) -> bool {
    match conn.call_with_timeout(&Ping {}, timeout).await {
        Ok(_) => true,
        Err(e) => {
            warn!(eventloop = conn.eventloop(), error = %e, "ping failed; dropping connection");
            conn.close();
            false
        }
    }
}
