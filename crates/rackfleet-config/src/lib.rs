//! Configuration for the rackfleet rack daemon and CLI.
//!
//! TOML file + `RACKFLEET_*` environment, shared-secret resolution
//! (env + keyring + secret file), and translation to
//! `rackfleet_core::ClusterConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use rackfleet_core::cluster::{IDENTITY_FILE, IntervalPolicy};
use rackfleet_core::{ClusterConfig, SharedSecret, TlsMode, TransportConfig};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable holding the hex shared secret.
pub const SECRET_ENV: &str = "RACKFLEET_SECRET";
/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "RACKFLEET_CONFIG";
pub const KEYRING_SERVICE: &str = "rackfleet";
pub const KEYRING_ENTRY: &str = "shared-secret";

const ENV_PREFIX: &str = "RACKFLEET_";
const SECRET_FILE: &str = "secret";
const DHCP_DIR: &str = "dhcp";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no shared secret: set RACKFLEET_SECRET, store one in the keyring, or write {path}")]
    NoSecret { path: String },

    #[error("shared secret is not valid hex: {0}")]
    InvalidSecret(#[from] hex::FromHexError),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration of a rack controller.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct Config {
    /// Region URLs to discover event-loops from, e.g.
    /// `http://region:5240/MAAS`.
    #[serde(default)]
    pub region_urls: Vec<String>,

    /// Identity assigned by the region. Falls back to the persisted
    /// identity file under `state_dir`.
    pub system_id: Option<String>,

    /// Name to register under. Defaults to the machine's hostname.
    pub hostname: Option<String>,

    pub cluster_uuid: Option<String>,

    /// Hex secret file. Defaults to `<state_dir>/secret`.
    pub secret_file: Option<PathBuf>,

    /// Holds `rpc.state`, `maas_id` and the default secret file.
    pub state_dir: Option<PathBuf>,

    /// Where the DHCP server state is written. Defaults to
    /// `<state_dir>/dhcp`.
    pub dhcp_dir: Option<PathBuf>,

    /// PEM CA certificate for region URLs served over HTTPS.
    pub ca_cert: Option<PathBuf>,

    /// Accept any region certificate. Wins over `ca_cert`.
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub rpc: RpcSettings,

    #[serde(default)]
    pub dhcp: DhcpSettings,
}

/// Connection timings, all in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcSettings {
    pub update_interval_low: u64,
    pub update_interval_mid: u64,
    pub update_interval_high: u64,
    pub keepalive_interval: u64,
    pub keepalive_timeout: u64,
    pub call_timeout: u64,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            update_interval_low: 1,
            update_interval_mid: 5,
            update_interval_high: 30,
            keepalive_interval: 30,
            keepalive_timeout: 10,
            call_timeout: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DhcpSettings {
    /// Bound on applying one family's configuration, in seconds.
    pub configure_timeout: u64,
}

impl Default for DhcpSettings {
    fn default() -> Self {
        Self {
            configure_timeout: 30,
        }
    }
}

impl Config {
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(default_state_dir)
    }

    pub fn dhcp_dir(&self) -> PathBuf {
        self.dhcp_dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join(DHCP_DIR))
    }

    pub fn secret_file(&self) -> PathBuf {
        self.secret_file
            .clone()
            .unwrap_or_else(|| self.state_dir().join(SECRET_FILE))
    }

    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(system_hostname)
    }

    /// Configured region URLs, parsed.
    pub fn region_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.region_urls
            .iter()
            .map(|raw| {
                Url::parse(raw).map_err(|e| ConfigError::Validation {
                    field: "region_urls".into(),
                    reason: format!("{raw}: {e}"),
                })
            })
            .collect()
    }

    /// Certificate policy for endpoint discovery.
    pub fn tls_mode(&self) -> TlsMode {
        if self.insecure {
            TlsMode::DangerAcceptInvalid
        } else if let Some(ref path) = self.ca_cert {
            TlsMode::CustomCa(path.clone())
        } else {
            TlsMode::System
        }
    }

    /// `system_id` from the config, else from the persisted identity file.
    pub fn effective_system_id(&self) -> Option<String> {
        self.system_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| persisted_system_id(&self.state_dir()))
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "rackfleet", "rackfleet")
}

/// Resolve the config file path: `$RACKFLEET_CONFIG`, else the platform
/// config directory.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    project_dirs().map_or_else(
        || home_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Platform data directory for rack state.
pub fn default_state_dir() -> PathBuf {
    project_dirs().map_or_else(
        || home_fallback(".local/share"),
        |dirs| dirs.data_local_dir().to_path_buf(),
    )
}

fn home_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("rackfleet");
    p
}

fn system_hostname() -> String {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".into())
}

/// The system id saved after the last successful registration.
pub fn persisted_system_id(state_dir: &Path) -> Option<String> {
    std::fs::read_to_string(state_dir.join(IDENTITY_FILE))
        .ok()
        .map(|id| id.trim().to_owned())
        .filter(|id| !id.is_empty())
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from `path` (if it exists) + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Shared secret ───────────────────────────────────────────────────

/// Resolve the hex shared secret.
///
/// 1. `$RACKFLEET_SECRET`
/// 2. System keyring (`rackfleet` / `shared-secret`)
/// 3. The secret file
pub fn resolve_secret(config: &Config) -> Result<SecretString, ConfigError> {
    if let Ok(val) = std::env::var(SECRET_ENV) {
        if !val.trim().is_empty() {
            return Ok(SecretString::from(val));
        }
    }

    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    let path = config.secret_file();
    secret_from_file(&path)?.ok_or_else(|| ConfigError::NoSecret {
        path: path.display().to_string(),
    })
}

/// Contents of a hex secret file, or `None` when it does not exist.
pub fn secret_from_file(path: &Path) -> Result<Option<SecretString>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(None),
        Ok(contents) => Ok(Some(SecretString::from(contents.trim().to_owned()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Decode a hex secret into the key used for the handshake digest.
pub fn decode_secret(secret: &SecretString) -> Result<SharedSecret, ConfigError> {
    let bytes = hex::decode(secret.expose_secret().trim())?;
    if bytes.is_empty() {
        return Err(ConfigError::Validation {
            field: "secret".into(),
            reason: "must not be empty".into(),
        });
    }
    Ok(SharedSecret::new(bytes))
}

/// Save the hex secret in the system keyring.
pub fn store_secret_in_keyring(secret: &SecretString) -> Result<(), ConfigError> {
    hex::decode(secret.expose_secret().trim())?;
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY)?;
    entry.set_password(secret.expose_secret().trim())?;
    Ok(())
}

/// Write the hex secret to `path`.
pub fn write_secret_file(path: &Path, secret: &SecretString) -> Result<(), ConfigError> {
    hex::decode(secret.expose_secret().trim())?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, format!("{}\n", secret.expose_secret().trim()))?;
    Ok(())
}

// ── Translation ─────────────────────────────────────────────────────

fn seconds(field: &str, value: u64) -> Result<Duration, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation {
            field: field.into(),
            reason: "must be at least one second".into(),
        });
    }
    Ok(Duration::from_secs(value))
}

/// Build the core's `ClusterConfig`.
pub fn to_cluster_config(config: &Config, secret: SharedSecret) -> Result<ClusterConfig, ConfigError> {
    let rpc = &config.rpc;
    let intervals = IntervalPolicy {
        low: seconds("rpc.update_interval_low", rpc.update_interval_low)?,
        mid: seconds("rpc.update_interval_mid", rpc.update_interval_mid)?,
        high: seconds("rpc.update_interval_high", rpc.update_interval_high)?,
        ..IntervalPolicy::default()
    };
    if intervals.low > intervals.mid || intervals.mid > intervals.high {
        return Err(ConfigError::Validation {
            field: "rpc".into(),
            reason: "update intervals must satisfy low <= mid <= high".into(),
        });
    }

    let mut cluster = ClusterConfig::new(
        config.region_urls()?,
        config.hostname(),
        secret,
        config.state_dir(),
    );
    cluster.system_id = config.system_id.clone().filter(|id| !id.is_empty());
    cluster.cluster_uuid.clone_from(&config.cluster_uuid);
    cluster.intervals = intervals;
    cluster.keepalive_interval = seconds("rpc.keepalive_interval", rpc.keepalive_interval)?;
    cluster.keepalive_timeout = seconds("rpc.keepalive_timeout", rpc.keepalive_timeout)?;
    cluster.call_timeout = seconds("rpc.call_timeout", rpc.call_timeout)?;
    cluster.configure_timeout = seconds("dhcp.configure_timeout", config.dhcp.configure_timeout)?;
    cluster.transport = TransportConfig {
        tls: config.tls_mode(),
        ..TransportConfig::default()
    }
    .with_timeout(cluster.call_timeout);
    Ok(cluster)
}
