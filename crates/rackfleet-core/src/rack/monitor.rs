// ── Local DHCP service state ──

use std::sync::Arc;

use rackfleet_api::IpFamily;
use tokio::sync::watch;
use tracing::{info, warn};

use super::server::DhcpServer;
use crate::model::ServiceStatus;

/// Running state of the local DHCP servers, one flag per family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DhcpState {
    pub v4: bool,
    pub v6: bool,
}

impl DhcpState {
    pub fn is_on(self, family: IpFamily) -> bool {
        match family {
            IpFamily::V4 => self.v4,
            IpFamily::V6 => self.v6,
        }
    }

    fn set(&mut self, family: IpFamily, on: bool) {
        match family {
            IpFamily::V4 => self.v4 = on,
            IpFamily::V6 => self.v6 = on,
        }
    }
}

/// Tracks which local DHCP servers run and can force them all off.
pub struct ServiceMonitor {
    server: Arc<dyn DhcpServer>,
    state: watch::Sender<DhcpState>,
}

impl ServiceMonitor {
    pub fn new(server: Arc<dyn DhcpServer>) -> Self {
        let (state, _) = watch::channel(DhcpState::default());
        Self { server, state }
    }

    pub fn server(&self) -> &Arc<dyn DhcpServer> {
        &self.server
    }

    pub fn mark(&self, family: IpFamily, on: bool) {
        self.state.send_modify(|state| state.set(family, on));
    }

    pub fn state(&self) -> DhcpState {
        *self.state.borrow()
    }

    pub fn status(&self, family: IpFamily) -> ServiceStatus {
        if self.state().is_on(family) {
            ServiceStatus::Running
        } else {
            ServiceStatus::Off
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<DhcpState> {
        self.state.subscribe()
    }

    /// Stop every DHCP server. Used when the rack loses sight of the
    /// region and can no longer trust its view of the network.
    pub async fn ensure_off(&self) {
        for family in IpFamily::ALL {
            match self.server.stop(family).await {
                Ok(()) => {
                    if self.state().is_on(family) {
                        info!(%family, "DHCP forced off");
                    }
                    self.mark(family, false);
                }
                Err(e) => warn!(%family, error = %e, "failed to stop DHCP"),
            }
        }
    }
}
