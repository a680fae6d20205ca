//! Discovery of advertised region event-loops.
//!
//! A region answers `GET <url>/rpc/` with the event-loops a rack may
//! connect to. While the region is still starting it answers 502 or 503,
//! which is reported as an [`RpcInfo`] with no event-loops rather than
//! as an error.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Event-loop name to the `(host, port)` pairs it listens on.
pub type Eventloops = BTreeMap<String, Vec<(String, u16)>>;

// ── RpcInfo ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcInfo {
    #[serde(default)]
    pub eventloops: Option<Eventloops>,
}

impl RpcInfo {
    /// Region has not finished starting.
    pub fn not_ready() -> Self {
        Self { eventloops: None }
    }

    pub fn is_ready(&self) -> bool {
        self.eventloops.is_some()
    }

    pub fn eventloop_count(&self) -> usize {
        self.eventloops.as_ref().map_or(0, BTreeMap::len)
    }
}

// ── EndpointClient ───────────────────────────────────────────────────

/// Thin HTTP client for the `/rpc/` discovery document.
#[derive(Debug, Clone)]
pub struct EndpointClient {
    http: reqwest::Client,
}

impl EndpointClient {
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client`.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// `<base>/rpc/`, tolerating a base with or without a trailing slash.
    pub fn rpc_info_url(base: &Url) -> Result<Url, Error> {
        let mut base = base.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(base.join("rpc/")?)
    }

    /// Fetch the advertised event-loops from one region URL.
    pub async fn fetch(&self, base: &Url) -> Result<RpcInfo, Error> {
        let url = Self::rpc_info_url(base)?;
        debug!(url = %url, "Fetching advertised event-loops");

        let resp = self.http.get(url.clone()).send().await?;
        let status = resp.status();
        if matches!(
            status,
            StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
        ) {
            debug!(url = %url, status = status.as_u16(), "Region not ready");
            return Ok(RpcInfo::not_ready());
        }
        if !status.is_success() {
            return Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }
}

// ── Address resolution ───────────────────────────────────────────────

/// Resolve `host:port`, IPv6 addresses first.
pub async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, Error> {
    let addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::WebSocketConnect(format!("cannot resolve {host}: {e}")))?;
    Ok(prefer_ipv6(addrs))
}

/// Stable-sort addresses so IPv6 entries precede IPv4, dropping duplicates.
pub fn prefer_ipv6(addrs: impl IntoIterator<Item = SocketAddr>) -> Vec<SocketAddr> {
    let mut out: Vec<SocketAddr> = Vec::new();
    for addr in addrs {
        if !out.contains(&addr) {
            out.push(addr);
        }
    }
    out.sort_by_key(SocketAddr::is_ipv4);
    out
}

/// WebSocket URL for the RPC channel on a resolved address.
pub fn websocket_url(addr: SocketAddr) -> Result<Url, Error> {
    Ok(Url::parse(&format!("ws://{addr}/ws"))?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn info_url_handles_trailing_slash() {
        let with = Url::parse("http://region:5240/MAAS/").unwrap();
        let without = Url::parse("http://region:5240/MAAS").unwrap();
        assert_eq!(
            EndpointClient::rpc_info_url(&with).unwrap().as_str(),
            "http://region:5240/MAAS/rpc/"
        );
        assert_eq!(
            EndpointClient::rpc_info_url(&without).unwrap().as_str(),
            "http://region:5240/MAAS/rpc/"
        );
    }

    #[test]
    fn ipv6_sorted_first() {
        let v4: SocketAddr = "10.0.0.1:5250".parse().unwrap();
        let v6: SocketAddr = "[fd00::1]:5250".parse().unwrap();
        let v4b: SocketAddr = "10.0.0.2:5250".parse().unwrap();
        assert_eq!(prefer_ipv6([v4, v6, v4b, v4]), vec![v6, v4, v4b]);
    }

    #[test]
    fn null_eventloops_parse() {
        let info: RpcInfo = serde_json::from_str(r#"{"eventloops": null}"#).unwrap();
        assert!(!info.is_ready());
        assert_eq!(info.eventloop_count(), 0);
    }

    #[test]
    fn websocket_url_brackets_ipv6() {
        let v6: SocketAddr = "[fd00::1]:5250".parse().unwrap();
        assert_eq!(websocket_url(v6).unwrap().as_str(), "ws://[fd00::1]:5250/ws");
    }
}
