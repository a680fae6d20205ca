//! Typed RPC commands.
//!
//! Every command names itself on the wire and declares its response type,
//! so callers get compile-time pairing of request and answer.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::base64_bytes;
use crate::dhcp::{DhcpConfig, ValidationIssue};
use crate::interfaces::{BeaconHint, InterfaceReport};

pub trait RpcCommand: Serialize + Send + Sync {
    const NAME: &'static str;
    type Response: Serialize + DeserializeOwned + Send;
}

/// Empty acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {}

// ── Liveness / identity ─────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ping {}

impl RpcCommand for Ping {
    const NAME: &'static str = "Ping";
    type Response = Ack;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Identify {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub ident: String,
}

impl RpcCommand for Identify {
    const NAME: &'static str = "Identify";
    type Response = Identity;
}

// ── Authentication ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authenticate {
    #[serde(with = "base64_bytes")]
    pub message: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    #[serde(with = "base64_bytes")]
    pub digest: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub salt: Vec<u8>,
}

impl RpcCommand for Authenticate {
    const NAME: &'static str = "Authenticate";
    type Response = AuthResponse;
}

// ── Registration ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRackController {
    #[serde(default)]
    pub system_id: Option<String>,
    pub hostname: String,
    pub interfaces: InterfaceReport,
    #[serde(default)]
    pub hints: Option<Vec<BeaconHint>>,
    #[serde(default)]
    pub url: Option<Url>,
    #[serde(default)]
    pub cluster_uuid: Option<String>,
    #[serde(default)]
    pub beacon_support: bool,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    pub system_id: String,
    pub uuid: String,
    pub version: String,
}

impl RpcCommand for RegisterRackController {
    const NAME: &'static str = "RegisterRackController";
    type Response = Registration;
}

// ── DHCP ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigureDhcpV4(pub DhcpConfig);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigureDhcpV6(pub DhcpConfig);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidateDhcpV4(pub DhcpConfig);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidateDhcpV6(pub DhcpConfig);

/// Result of a validate-only call; `None` means the configuration is sound.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    #[serde(default)]
    pub errors: Option<Vec<ValidationIssue>>,
}

impl RpcCommand for ConfigureDhcpV4 {
    const NAME: &'static str = "ConfigureDHCPv4";
    type Response = Ack;
}

impl RpcCommand for ConfigureDhcpV6 {
    const NAME: &'static str = "ConfigureDHCPv6";
    type Response = Ack;
}

impl RpcCommand for ValidateDhcpV4 {
    const NAME: &'static str = "ValidateDHCPv4";
    type Response = ValidationReport;
}

impl RpcCommand for ValidateDhcpV6 {
    const NAME: &'static str = "ValidateDHCPv6";
    type Response = ValidationReport;
}

