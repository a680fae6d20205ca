//! `rackfleet run`: the rack controller daemon.
//!
//! Wires the config into a [`ClusterClientService`], keeps its channels
//! checked and serves DHCP from the configured directory until ctrl-c.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use rackfleet_api::interfaces::InterfaceReport;
use rackfleet_core::cluster::InterfaceSource;
use rackfleet_core::{
    ClusterClientService, ConnectionChecker, CoreError, FileDhcpServer, RackResponder,
    ServiceMonitor,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{GlobalOpts, RunArgs};
use crate::error::CliError;

use super::util;

/// Interface report read from disk at every registration, so an external
/// collector can keep it current.
struct FileInterfaces(PathBuf);

#[async_trait]
impl InterfaceSource for FileInterfaces {
    async fn interfaces(&self) -> Result<InterfaceReport, CoreError> {
        let raw = tokio::fs::read_to_string(&self.0).await.map_err(|e| {
            CoreError::Internal(format!("cannot read {}: {e}", self.0.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CoreError::validation(format!("{} is not an interface report: {e}", self.0.display()))
        })
    }
}

pub async fn handle(args: RunArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let config = util::load_config(global)?;
    let secret = rackfleet_config::resolve_secret(&config)?;
    let secret = rackfleet_config::decode_secret(&secret)?;
    let cluster = rackfleet_config::to_cluster_config(&config, secret.clone())?;

    // Fail before dialing when the report is unusable.
    let interfaces = FileInterfaces(args.interfaces);
    let report = interfaces.interfaces().await?;
    info!(interfaces = report.len(), "loaded interface report");
    if cluster.region_urls.is_empty() {
        warn!("no region URLs configured; relying on rpc.state from a previous run");
    }

    let dhcp_dir = config.dhcp_dir();
    let monitor = Arc::new(ServiceMonitor::new(Arc::new(FileDhcpServer::new(&dhcp_dir))));
    let responder = Arc::new(RackResponder::new(
        config.effective_system_id().unwrap_or_default(),
        secret,
        Arc::clone(&monitor),
        cluster.configure_timeout,
    ));
    let (interval, timeout) = (cluster.keepalive_interval, cluster.keepalive_timeout);
    let service = ClusterClientService::new(cluster, responder, Arc::new(interfaces))?;

    info!(
        hostname = %service.config().hostname,
        dhcp_dir = %dhcp_dir.display(),
        "starting rack controller"
    );
    service.start().await;
    let cancel: CancellationToken = service.cancellation().child_token();
    let checker = ConnectionChecker::new(service.clone())
        .with_timing(interval, timeout)
        .spawn(cancel.clone());
    let watcher = tokio::spawn(log_dhcp_state(Arc::clone(&monitor), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    cancel.cancel();
    service.stop().await;
    let _ = tokio::join!(checker, watcher);
    monitor.ensure_off().await;
    Ok(())
}

/// Log every DHCP on/off transition until cancelled.
async fn log_dhcp_state(monitor: Arc<ServiceMonitor>, cancel: CancellationToken) {
    let mut states = monitor.subscribe();
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(dhcpd = state.v4, dhcpd6 = state.v6, "DHCP state changed");
            }
        }
    }
}
