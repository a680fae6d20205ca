// ── Local DHCP server backend ──

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ipnetwork::IpNetwork;
use rackfleet_api::IpFamily;
use rackfleet_api::dhcp::{DhcpConfig, ValidationIssue};
use tracing::{debug, info};

use crate::error::CoreError;

/// What the rack does with a configuration pushed by the region.
#[async_trait]
pub trait DhcpServer: Send + Sync {
    /// Apply `config` and (re)start the server for `family`.
    async fn apply(&self, family: IpFamily, config: &DhcpConfig) -> Result<(), CoreError>;

    /// Structural problems in `config`, without applying it.
    async fn validate(&self, family: IpFamily, config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError>;

    /// Stop serving `family`.
    async fn stop(&self, family: IpFamily) -> Result<(), CoreError>;
}

// ── Structural validation ───────────────────────────────────────────

fn issue(error: impl Into<String>) -> ValidationIssue {
    ValidationIssue {
        error: error.into(),
        line_num: None,
        line: None,
    }
}

/// Problems a DHCP server would refuse to start with.
pub fn validate_config(family: IpFamily, config: &DhcpConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if config.omapi_key.is_empty() && !config.is_empty() {
        issues.push(issue("missing OMAPI key"));
    }

    let peers: BTreeSet<&str> = config.failover_peers.iter().map(|peer| peer.name.as_str()).collect();
    let mut network_names = BTreeSet::new();
    for network in &config.shared_networks {
        if !network_names.insert(network.name.as_str()) {
            issues.push(issue(format!("duplicate shared network {}", network.name)));
        }
        for subnet in &network.subnets {
            let cidr: IpNetwork = match subnet.subnet_cidr.parse() {
                Ok(cidr) => cidr,
                Err(e) => {
                    issues.push(issue(format!("subnet {}: {e}", subnet.subnet_cidr)));
                    continue;
                }
            };
            if !family.matches(&cidr.ip()) {
                issues.push(issue(format!("subnet {} is not an {family} network", subnet.subnet_cidr)));
            }
            for pool in &subnet.pools {
                if !cidr.contains(pool.ip_range_low) || !cidr.contains(pool.ip_range_high) {
                    issues.push(issue(format!(
                        "range {}-{} is outside {}",
                        pool.ip_range_low, pool.ip_range_high, subnet.subnet_cidr
                    )));
                } else if pool.ip_range_low > pool.ip_range_high {
                    issues.push(issue(format!(
                        "range {}-{} is reversed",
                        pool.ip_range_low, pool.ip_range_high
                    )));
                }
                if let Some(peer) = pool.failover_peer.as_deref() {
                    if !peers.contains(peer) {
                        issues.push(issue(format!("pool refers to unknown failover peer {peer}")));
                    }
                }
            }
        }
    }

    let mut macs = BTreeSet::new();
    for host in &config.hosts {
        if !family.matches(&host.ip) {
            issues.push(issue(format!("host {} has {} outside {family}", host.mac, host.ip)));
        }
        if !host.host.is_empty() && !macs.insert((host.host.as_str(), host.mac.as_str())) {
            issues.push(issue(format!("duplicate host entry {} for {}", host.host, host.mac)));
        }
    }
    issues
}

// ── FileDhcpServer ──────────────────────────────────────────────────

/// Writes each family's configuration as JSON, plus the interfaces to
/// bind, under one directory. An external supervisor renders and runs
/// the actual server from those files.
#[derive(Debug, Clone)]
pub struct FileDhcpServer {
    dir: PathBuf,
}

impl FileDhcpServer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn config_path(&self, family: IpFamily) -> PathBuf {
        self.dir.join(format!("{}.json", family.service_name()))
    }

    pub fn interfaces_path(&self, family: IpFamily) -> PathBuf {
        self.dir.join(format!("{}-interfaces", family.service_name()))
    }
}

/// Replace `path` with `contents` unless it already holds them.
async fn write_if_changed(path: &Path, contents: &[u8]) -> Result<bool, CoreError> {
    if tokio::fs::read(path).await.ok().as_deref() == Some(contents) {
        return Ok(false);
    }
    let staging = path.with_extension("tmp");
    tokio::fs::write(&staging, contents).await.map_err(|e| io_error(&staging, &e))?;
    tokio::fs::rename(&staging, path).await.map_err(|e| io_error(path, &e))?;
    Ok(true)
}

async fn remove_if_present(path: &Path) -> Result<(), CoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(io_error(path, &e)),
    }
}

fn io_error(path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Internal(format!("{}: {err}", path.display()))
}

#[async_trait]
impl DhcpServer for FileDhcpServer {
    async fn apply(&self, family: IpFamily, config: &DhcpConfig) -> Result<(), CoreError> {
        let issues = validate_config(family, config);
        if let Some(first) = issues.first() {
            return Err(CoreError::validation(format!(
                "{} problem(s) in {family} configuration, first: {}",
                issues.len(),
                first.error
            )));
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, &e))?;
        let body = serde_json::to_vec_pretty(config)
            .map_err(|e| CoreError::Internal(format!("cannot encode {family} configuration: {e}")))?;
        let names: Vec<&str> = config.interfaces.iter().map(|i| i.name.as_str()).collect();

        let config_changed = write_if_changed(&self.config_path(family), &body).await?;
        let interfaces_changed =
            write_if_changed(&self.interfaces_path(family), names.join(" ").as_bytes()).await?;
        if config_changed || interfaces_changed {
            info!(%family, dir = %self.dir.display(), "DHCP configuration written");
        } else {
            debug!(%family, "DHCP configuration unchanged");
        }
        Ok(())
    }

    async fn validate(&self, family: IpFamily, config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError> {
        Ok(validate_config(family, config))
    }

    async fn stop(&self, family: IpFamily) -> Result<(), CoreError> {
        remove_if_present(&self.config_path(family)).await?;
        remove_if_present(&self.interfaces_path(family)).await?;
        debug!(%family, "DHCP configuration removed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rackfleet_api::dhcp::{HostReservation, InterfaceName, Pool, SharedNetwork, SubnetConfig};

    fn config() -> DhcpConfig {
        DhcpConfig {
            omapi_key: "a2V5".into(),
            failover_peers: Vec::new(),
            shared_networks: vec![SharedNetwork {
                name: "vlan-5".into(),
                mtu: 1500,
                subnets: vec![SubnetConfig {
                    subnet: "10.9.8.0".parse().unwrap(),
                    subnet_mask: Some("255.255.255.0".parse().unwrap()),
                    subnet_cidr: "10.9.8.0/24".into(),
                    broadcast_ip: "10.9.8.255".parse().unwrap(),
                    router_ip: String::new(),
                    dns_servers: Vec::new(),
                    ntp_servers: Vec::new(),
                    domain_name: "maas".into(),
                    search_list: vec!["maas".into()],
                    pools: vec![Pool {
                        ip_range_low: "10.9.8.11".parse().unwrap(),
                        ip_range_high: "10.9.8.20".parse().unwrap(),
                        failover_peer: None,
                        dhcp_snippets: Vec::new(),
                    }],
                    dhcp_snippets: Vec::new(),
                    disabled_boot_architectures: Vec::new(),
                }],
                interface: Some("eth0".into()),
            }],
            hosts: vec![HostReservation {
                host: "node1-eth0".into(),
                mac: "00:11:22:33:44:55".into(),
                ip: "10.9.8.5".parse().unwrap(),
                dhcp_snippets: Vec::new(),
            }],
            interfaces: vec![InterfaceName { name: "eth0".into() }],
            global_dhcp_snippets: Vec::new(),
        }
    }

    #[test]
    fn sound_config_has_no_issues() {
        assert!(validate_config(IpFamily::V4, &config()).is_empty());
    }

    #[test]
    fn unknown_peer_and_stray_range_are_reported() {
        let mut bad = config();
        let pool = &mut bad.shared_networks[0].subnets[0].pools[0];
        pool.failover_peer = Some("failover-vlan-5".into());
        pool.ip_range_high = "10.9.9.1".parse().unwrap();

        let issues = validate_config(IpFamily::V4, &bad);
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.error.contains("outside 10.9.8.0/24")));
        assert!(issues.iter().any(|i| i.error.contains("unknown failover peer")));
    }

    #[test]
    fn family_mismatch_is_reported() {
        assert!(!validate_config(IpFamily::V6, &config()).is_empty());
    }

    #[tokio::test]
    async fn apply_writes_and_stop_removes() {
        let dir = tempfile::tempdir().unwrap();
        let server = FileDhcpServer::new(dir.path());

        server.apply(IpFamily::V4, &config()).await.unwrap();
        let written: DhcpConfig =
            serde_json::from_slice(&std::fs::read(server.config_path(IpFamily::V4)).unwrap()).unwrap();
        assert_eq!(written, config());
        assert_eq!(
            std::fs::read_to_string(server.interfaces_path(IpFamily::V4)).unwrap(),
            "eth0"
        );

        server.stop(IpFamily::V4).await.unwrap();
        assert!(!server.config_path(IpFamily::V4).exists());
        server.stop(IpFamily::V4).await.unwrap();
    }

    #[tokio::test]
    async fn invalid_config_is_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let server = FileDhcpServer::new(dir.path());
        let mut bad = config();
        bad.omapi_key.clear();

        assert!(matches!(
            server.apply(IpFamily::V4, &bad).await,
            Err(CoreError::ValidationFailed { .. })
        ));
        assert!(!server.config_path(IpFamily::V4).exists());
    }
}
