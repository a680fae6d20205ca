// ── Runtime configuration ──
//
// Plain values the core runs with. Loading them from files, the
// environment and the keyring is rackfleet-config's job.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rackfleet_api::TransportConfig;
use secrecy::{ExposeSecret, SecretSlice};
use url::Url;

use crate::cluster::IntervalPolicy;

/// Key shared by every rack and region controller of one cluster.
#[derive(Clone)]
pub struct SharedSecret(Arc<SecretSlice<u8>>);

impl SharedSecret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Arc::new(SecretSlice::from(bytes)))
    }

    pub fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret([REDACTED])")
    }
}

/// Everything a rack controller needs to join its region.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Region URLs to discover event-loops from, e.g.
    /// `http://region:5240/MAAS`.
    pub region_urls: Vec<Url>,
    pub hostname: String,
    /// Durable identity, once the region has assigned one.
    pub system_id: Option<String>,
    pub cluster_uuid: Option<String>,
    pub version: String,
    pub secret: SharedSecret,
    /// Holds `rpc.state` and `maas_id`.
    pub state_dir: PathBuf,
    pub intervals: IntervalPolicy,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub call_timeout: Duration,
    pub configure_timeout: Duration,
    pub transport: TransportConfig,
}

impl ClusterConfig {
    pub fn new(region_urls: Vec<Url>, hostname: impl Into<String>, secret: SharedSecret, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            region_urls,
            hostname: hostname.into(),
            system_id: None,
            cluster_uuid: None,
            version: env!("CARGO_PKG_VERSION").to_owned(),
            secret,
            state_dir: state_dir.into(),
            intervals: IntervalPolicy::default(),
            keepalive_interval: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(60),
            configure_timeout: Duration::from_secs(30),
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn secret_never_prints() {
        let secret = SharedSecret::new(b"hunter2".to_vec());
        assert_eq!(secret.expose(), b"hunter2");
        assert!(!format!("{secret:?}").contains("hunter2"));
    }
}
