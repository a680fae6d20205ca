// ── Persisted rack state ──
//
// `rpc.state` remembers which region addresses the rack last reached so a
// restart can find the region when the configured URL is down. `maas_id`
// holds the system id the region confirmed at registration.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::error::CoreError;

pub const RPC_STATE_FILE: &str = "rpc.state";
pub const IDENTITY_FILE: &str = "maas_id";

/// Port and path a region serves its API on.
const REGION_PORT: u16 = 5240;
const REGION_PATH: &str = "MAAS";

fn io_error(path: &Path, err: &std::io::Error) -> CoreError {
    CoreError::Internal(format!("{}: {err}", path.display()))
}

/// Region URL for a connected address, IPv6 bracketed.
pub fn region_url_for(addr: IpAddr) -> String {
    match addr {
        IpAddr::V4(v4) => format!("http://{v4}:{REGION_PORT}/{REGION_PATH}"),
        IpAddr::V6(v6) => format!("http://[{v6}]:{REGION_PORT}/{REGION_PATH}"),
    }
}

// ── Last known good endpoints ───────────────────────────────────────

#[derive(Debug)]
pub struct RpcStateFile {
    path: PathBuf,
    written: Mutex<Option<BTreeSet<IpAddr>>>,
}

impl RpcStateFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(RPC_STATE_FILE),
            written: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Saved region URLs; empty when the file is missing or unreadable.
    pub async fn load(&self) -> Vec<Url> {
        let Ok(text) = tokio::fs::read_to_string(&self.path).await else {
            return Vec::new();
        };
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| match Url::parse(line) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(line, error = %e, "ignoring bad line in {RPC_STATE_FILE}");
                    None
                }
            })
            .collect()
    }

    /// Record the connected addresses, rewriting the file only when the
    /// set differs from what was last written.
    pub async fn update(&self, connected: BTreeSet<IpAddr>) -> Result<bool, CoreError> {
        let mut written = self.written.lock().await;
        if written.as_ref() == Some(&connected) {
            return Ok(false);
        }

        let mut body = String::new();
        for addr in &connected {
            let _ = writeln!(body, "{}", region_url_for(*addr));
        }
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, &e))?;
        }
        tokio::fs::write(&self.path, body)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        debug!(count = connected.len(), path = %self.path.display(), "saved region endpoints");
        *written = Some(connected);
        Ok(true)
    }
}

// ── Identity ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(IDENTITY_FILE),
        }
    }

    pub async fn load(&self) -> Option<String> {
        let text = tokio::fs::read_to_string(&self.path).await.ok()?;
        let id = text.trim();
        (!id.is_empty()).then(|| id.to_owned())
    }

    /// Persist `system_id` unless it is already stored.
    pub async fn store(&self, system_id: &str) -> Result<bool, CoreError> {
        if self.load().await.as_deref() == Some(system_id) {
            return Ok(false);
        }
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| io_error(dir, &e))?;
        }
        tokio::fs::write(&self.path, system_id)
            .await
            .map_err(|e| io_error(&self.path, &e))?;
        Ok(true)
    }
}
