// ── Cluster connection service ──
//
// Keeps one authenticated, registered RPC channel open to every event-loop
// the region advertises. Each update fetches the advertised endpoints,
// drops channels the region no longer lists and dials the missing ones.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::{DashMap, DashSet};
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use rackfleet_api::endpoints::{Eventloops, prefer_ipv6, resolve, websocket_url};
use rackfleet_api::rpc::commands::{RegisterRackController, Registration};
use rackfleet_api::{ConnectionOptions, EndpointClient, Responder, RpcConnection};
use rand::seq::SliceRandom;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::handshake::{self, InterfaceSource};
use super::state::{IdentityFile, RpcStateFile};
use crate::config::ClusterConfig;
use crate::error::CoreError;
use crate::rack::RackResponder;

type UpdateFuture = Shared<BoxFuture<'static, ()>>;

/// Rack-side connections to the region. Cheap to clone.
#[derive(Clone)]
pub struct ClusterClientService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: ClusterConfig,
    endpoints: EndpointClient,
    responder: Arc<RackResponder>,
    interfaces: Arc<dyn InterfaceSource>,
    /// Live, registered channels keyed by event-loop.
    connections: DashMap<String, Arc<RpcConnection>>,
    /// Event-loops being dialed or handshaking.
    connecting: DashSet<String>,
    rpc_state: RpcStateFile,
    identity: IdentityFile,
    /// Region URL the current event-loops were advertised by.
    region_url: ArcSwapOption<Url>,
    started: Instant,
    interval: watch::Sender<Duration>,
    update: Mutex<Option<UpdateFuture>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterClientService {
    pub fn new(
        config: ClusterConfig,
        responder: Arc<RackResponder>,
        interfaces: Arc<dyn InterfaceSource>,
    ) -> Result<Self, CoreError> {
        let endpoints = EndpointClient::new(&config.transport)?;
        let (interval, _) = watch::channel(config.intervals.low);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                rpc_state: RpcStateFile::new(&config.state_dir),
                identity: IdentityFile::new(&config.state_dir),
                config,
                endpoints,
                responder,
                interfaces,
                connections: DashMap::new(),
                connecting: DashSet::new(),
                region_url: ArcSwapOption::empty(),
                started: Instant::now(),
                interval,
                update: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.inner.config
    }

    pub fn responder(&self) -> &Arc<RackResponder> {
        &self.inner.responder
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the periodic update loop.
    pub async fn start(&self) {
        let service = self.clone();
        let cancel = self.inner.cancel.child_token();
        self.inner
            .task_handles
            .lock()
            .await
            .push(tokio::spawn(update_task(service, cancel)));
        info!(urls = self.inner.config.region_urls.len(), "cluster client service started");
    }

    /// Stop updating and close every channel.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        for conn in self.get_all_clients() {
            conn.close();
        }
        debug!("cluster client service stopped");
    }

    /// Cancelled when the service stops; tasks tied to its lifetime
    /// derive child tokens from it.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Current delay between updates.
    pub fn interval(&self) -> Duration {
        *self.inner.interval.borrow()
    }

    // ── Client access ────────────────────────────────────────────────

    /// A random open channel.
    pub fn get_client(&self) -> Result<Arc<RpcConnection>, CoreError> {
        self.get_all_clients()
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(CoreError::NoConnectionsAvailable)
    }

    /// Like [`get_client`](Self::get_client), but updates first when no
    /// channel is open.
    pub async fn get_client_now(&self) -> Result<Arc<RpcConnection>, CoreError> {
        match self.get_client() {
            Err(CoreError::NoConnectionsAvailable) => {
                self.update_now().await;
                self.get_client()
            }
            other => other,
        }
    }

    /// Every open channel.
    pub fn get_all_clients(&self) -> Vec<Arc<RpcConnection>> {
        self.inner
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .filter(|conn| !conn.is_closed())
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }

    /// Event-loops with a registered channel, sorted.
    pub fn connected_eventloops(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.connections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn region_url(&self) -> Option<Arc<Url>> {
        self.inner.region_url.load_full()
    }

    // ── Updating ─────────────────────────────────────────────────────

    /// Run one update, or wait for the one already running.
    pub async fn update_now(&self) {
        let update = {
            let mut slot = self.inner.update.lock().await;
            match slot.as_ref() {
                Some(running) if running.peek().is_none() => running.clone(),
                _ => {
                    let service = self.clone();
                    let fresh = async move { service.do_update().await }.boxed().shared();
                    *slot = Some(fresh.clone());
                    fresh
                }
            }
        };
        update.await;

        let mut slot = self.inner.update.lock().await;
        if slot.as_ref().is_some_and(|running| running.peek().is_some()) {
            *slot = None;
        }
    }

    async fn do_update(&self) {
        let urls = &self.inner.config.region_urls;
        let mut advertised = None;
        match self.rpc_info(urls).await {
            Ok(Some((eventloops, region_url))) => {
                advertised = Some(eventloops.len());
                self.inner.region_url.store(Some(Arc::new(region_url)));
                self.update_connections(eventloops).await;
            }
            Ok(None) => {
                self.inner.region_url.store(None);
                info!(urls = %display_urls(urls), "region is not advertising RPC endpoints");
            }
            Err(e) => {
                self.inner.region_url.store(None);
                warn!(urls = %display_urls(urls), error = %e, "region not available");
            }
        }

        let next = self
            .inner
            .config
            .intervals
            .next(self.inner.started.elapsed(), advertised, self.connection_count());
        self.inner.interval.send_replace(next);
    }

    /// Advertised event-loops, from the configured URLs or, failing
    /// those, the last known good ones.
    async fn rpc_info(&self, configured: &[Url]) -> Result<Option<(Eventloops, Url)>, CoreError> {
        let config_error = match self.fetch_best(configured).await {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => None,
            Err(e) => Some(e),
        };

        let saved = self.inner.rpc_state.load().await;
        if !saved.is_empty() {
            match self.fetch_best(&saved).await {
                Ok(Some(found)) => {
                    debug!("reached the region through saved endpoints");
                    return Ok(Some(found));
                }
                Ok(None) => {}
                Err(e) => debug!(error = %e, "saved endpoints unreachable"),
            }
        }

        config_error.map_or(Ok(None), Err)
    }

    /// Query `urls` in parallel; the answer listing the most event-loops
    /// wins. Fails with the first error when nothing answered.
    async fn fetch_best(&self, urls: &[Url]) -> Result<Option<(Eventloops, Url)>, CoreError> {
        let answers = join_all(urls.iter().map(|url| async move {
            (url, self.inner.endpoints.fetch(url).await)
        }))
        .await;

        let mut best: Option<(Eventloops, Url)> = None;
        let mut first_error = None;
        for (url, answer) in answers {
            match answer {
                Ok(info) => {
                    let Some(eventloops) = info.eventloops else { continue };
                    if eventloops.is_empty() {
                        continue;
                    }
                    if best.as_ref().is_none_or(|(known, _)| eventloops.len() > known.len()) {
                        best = Some((eventloops, url.clone()));
                    }
                }
                Err(e) => {
                    debug!(url = %url, error = %e, "endpoint fetch failed");
                    first_error.get_or_insert(e);
                }
            }
        }

        match (best, first_error) {
            (Some(found), _) => Ok(Some(found)),
            (None, Some(e)) => Err(e.into()),
            (None, None) => Ok(None),
        }
    }

    async fn update_connections(&self, eventloops: Eventloops) {
        let desired = resolve_eventloops(&eventloops).await;

        let mut stale = Vec::new();
        for entry in &self.inner.connections {
            let keep = desired.get(entry.key()).is_some_and(|addrs| {
                entry.value().address().is_none_or(|addr| addrs.contains(&addr))
            });
            if !keep {
                stale.push((entry.key().clone(), Arc::clone(entry.value())));
            }
        }
        let dropped: BTreeSet<&str> = stale.iter().map(|(name, _)| name.as_str()).collect();
        if !stale.is_empty() {
            info!(eventloops = %dropped.iter().copied().collect::<Vec<_>>().join(", "), "dropping connections");
        }
        for (name, conn) in &stale {
            self.inner.connections.remove_if(name, |_, known| known.id() == conn.id());
            conn.close();
        }

        let connect: Vec<(&String, &Vec<SocketAddr>)> = desired
            .iter()
            .filter(|(name, _)| {
                dropped.contains(name.as_str())
                    || (!self.inner.connections.contains_key(*name) && !self.inner.connecting.contains(*name))
            })
            .collect();
        if connect.is_empty() {
            if stale.is_empty() && !desired.is_empty() {
                debug!(eventloops = desired.len(), "fully connected");
            }
            return;
        }

        info!(
            eventloops = %connect.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", "),
            "making connections"
        );
        join_all(
            connect
                .into_iter()
                .map(|(name, addrs)| self.make_connection(name, addrs)),
        )
        .await;
    }

    /// Dial `addrs` in order until one connects, then handshake over it.
    /// A failed handshake is not retried until the next update.
    async fn make_connection(&self, eventloop: &str, addrs: &[SocketAddr]) {
        if !self.inner.connecting.insert(eventloop.to_owned()) {
            return;
        }
        for addr in addrs {
            let url = match websocket_url(*addr) {
                Ok(url) => url,
                Err(e) => {
                    warn!(eventloop, %addr, error = %e, "bad event-loop address");
                    continue;
                }
            };
            let responder: Arc<dyn Responder> = Arc::clone(&self.inner.responder) as Arc<dyn Responder>;
            let options = ConnectionOptions {
                call_timeout: self.inner.config.call_timeout,
            };
            match RpcConnection::connect(&url, eventloop, Some(*addr), responder, options).await {
                Ok(conn) => {
                    if let Err(e) = self.attach(conn).await {
                        warn!(eventloop, %addr, error = %e, "handshake failed; dropping connection");
                    }
                    break;
                }
                Err(e) => debug!(eventloop, %addr, error = %e, "event-loop unreachable"),
            }
        }
        self.inner.connecting.remove(eventloop);
    }

    /// Handshake over an established channel and start tracking it.
    ///
    /// The channel is closed when the handshake fails.
    pub async fn attach(&self, conn: Arc<RpcConnection>) -> Result<Registration, CoreError> {
        let request = match self.registration_request().await {
            Ok(request) => request,
            Err(e) => {
                conn.close();
                return Err(e);
            }
        };
        match handshake::perform(&conn, &self.inner.config.secret, &request).await {
            Ok(registration) => {
                self.add_connection(conn, &registration).await;
                Ok(registration)
            }
            Err(e) => {
                conn.close();
                Err(e)
            }
        }
    }

    async fn registration_request(&self) -> Result<RegisterRackController, CoreError> {
        let config = &self.inner.config;
        let system_id = match config.system_id.clone() {
            Some(id) => Some(id),
            None => self.inner.identity.load().await,
        };
        Ok(RegisterRackController {
            system_id,
            hostname: config.hostname.clone(),
            interfaces: self.inner.interfaces.interfaces().await?,
            hints: None,
            url: self.region_url().map(|url| url.as_ref().clone()),
            cluster_uuid: config.cluster_uuid.clone(),
            beacon_support: false,
            version: config.version.clone(),
        })
    }

    async fn add_connection(&self, conn: Arc<RpcConnection>, registration: &Registration) {
        let eventloop = conn.eventloop().to_owned();
        if let Some(previous) = self.inner.connections.insert(eventloop.clone(), Arc::clone(&conn)) {
            if previous.id() != conn.id() {
                previous.close();
            }
        }
        self.inner.responder.set_ident(registration.system_id.clone());
        if let Err(e) = self.inner.identity.store(&registration.system_id).await {
            warn!(error = %e, "failed to persist system id");
        }
        self.save_rpc_state().await;

        let service = Arc::downgrade(&self.inner);
        tokio::spawn(watch_connection(service, eventloop, conn));
    }

    async fn save_rpc_state(&self) {
        let connected: BTreeSet<IpAddr> = self
            .inner
            .connections
            .iter()
            .filter_map(|entry| entry.value().address().map(|addr| addr.ip()))
            .collect();
        if let Err(e) = self.inner.rpc_state.update(connected).await {
            warn!(error = %e, "failed to save region endpoints");
        }
    }

    /// Forget a closed channel and drop the update interval back to its
    /// fastest so the gap is redialed soon. Losing the last one also turns
    /// DHCP off.
    async fn remove_connection(&self, eventloop: &str, conn: &RpcConnection) {
        let removed = self
            .inner
            .connections
            .remove_if(eventloop, |_, known| known.id() == conn.id())
            .is_some();
        if !removed {
            return;
        }
        debug!(eventloop, "connection lost");
        self.inner.interval.send_replace(self.inner.config.intervals.low);
        if self.inner.connections.is_empty() {
            warn!("lost all connections to region controllers");
            self.inner.responder.monitor().ensure_off().await;
        }
    }
}

fn display_urls(urls: &[Url]) -> String {
    urls.iter().map(Url::as_str).collect::<Vec<_>>().join(", ")
}

/// Resolve every advertised `(host, port)`, IPv6 first.
async fn resolve_eventloops(eventloops: &Eventloops) -> BTreeMap<String, Vec<SocketAddr>> {
    let mut resolved = BTreeMap::new();
    for (name, endpoints) in eventloops {
        let mut addrs = Vec::new();
        for (host, port) in endpoints {
            match resolve(host, *port).await {
                Ok(found) => addrs.extend(found),
                Err(e) => debug!(eventloop = %name, host, error = %e, "cannot resolve event-loop host"),
            }
        }
        let mut addrs = prefer_ipv6(addrs);
        addrs.dedup();
        resolved.insert(name.clone(), addrs);
    }
    resolved
}

/// Remove `conn` from the service once it closes.
async fn watch_connection(service: Weak<ServiceInner>, eventloop: String, conn: Arc<RpcConnection>) {
    conn.closed().await;
    if let Some(inner) = service.upgrade() {
        ClusterClientService { inner }.remove_connection(&eventloop, &conn).await;
    }
}

async fn update_task(service: ClusterClientService, cancel: CancellationToken) {
    let mut interval = service.inner.interval.subscribe();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = service.update_now() => {}
        }

        let wait = *interval.borrow_and_update();
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(wait) => {}
            changed = interval.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
