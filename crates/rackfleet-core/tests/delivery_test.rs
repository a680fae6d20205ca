#![allow(clippy::unwrap_used)]
// DHCP delivery from a region to a rack registered over an in-process
// channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rackfleet_api::dhcp::{DhcpConfig, ValidationIssue};
use rackfleet_api::interfaces::{InterfaceReport, InterfaceType, LinkMode, ReportedInterface, ReportedLink};
use rackfleet_api::{ConnectionOptions, IpFamily, Responder, RpcConnection};
use rackfleet_core::cluster::StaticInterfaces;
use rackfleet_core::model::{DhcpSnippet, Node, NodeId, NodeKind, ServiceStatus, SnippetId, SnippetScope};
use rackfleet_core::store::{
    InterfaceRepository, NodeRepository, ServiceStatusRepository, VlanRepository,
};
use rackfleet_core::{
    ClusterClientService, ClusterConfig, CoreError, DataStore, DeliveryOptions, DhcpDelivery,
    DhcpServer, FileDhcpServer, RackClients, RackResponder, Region, ServiceMonitor, SharedSecret,
    Topology,
};
use tempfile::TempDir;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

// ── Helpers ─────────────────────────────────────────────────────────

/// A server that cannot write its configuration.
struct BrokenServer;

#[async_trait]
impl DhcpServer for BrokenServer {
    async fn apply(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<(), CoreError> {
        Err(CoreError::Internal("disk full".into()))
    }

    async fn validate(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError> {
        Ok(Vec::new())
    }

    async fn stop(&self, _family: IpFamily) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Accepts everything, but flags every global snippet in IPv4 configs.
struct PickyServer;

#[async_trait]
impl DhcpServer for PickyServer {
    async fn apply(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<(), CoreError> {
        Ok(())
    }

    async fn validate(&self, family: IpFamily, config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError> {
        if family == IpFamily::V6 {
            return Ok(Vec::new());
        }
        Ok(config
            .global_dhcp_snippets
            .iter()
            .map(|snippet| ValidationIssue {
                error: format!("rejected snippet {}", snippet.name),
                line_num: Some(1),
                line: Some(snippet.value.clone()),
            })
            .collect())
    }

    async fn stop(&self, _family: IpFamily) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Takes longer over IPv4 than any delivery is willing to wait.
struct SlowServer;

#[async_trait]
impl DhcpServer for SlowServer {
    async fn apply(&self, family: IpFamily, _config: &DhcpConfig) -> Result<(), CoreError> {
        if family == IpFamily::V4 {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Ok(())
    }

    async fn validate(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError> {
        Ok(Vec::new())
    }

    async fn stop(&self, _family: IpFamily) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Signals `started` and never finishes applying.
struct StalledServer {
    started: Arc<Notify>,
}

#[async_trait]
impl DhcpServer for StalledServer {
    async fn apply(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<(), CoreError> {
        self.started.notify_one();
        std::future::pending().await
    }

    async fn validate(&self, _family: IpFamily, _config: &DhcpConfig) -> Result<Vec<ValidationIssue>, CoreError> {
        Ok(Vec::new())
    }

    async fn stop(&self, _family: IpFamily) -> Result<(), CoreError> {
        Ok(())
    }
}

struct Fixture {
    region: Arc<Region>,
    rack: Arc<RackResponder>,
    node: NodeId,
    dir: TempDir,
    rack_side: Arc<RpcConnection>,
    _service: ClusterClientService,
    _region_side: Arc<RpcConnection>,
}

fn report() -> InterfaceReport {
    let mut report = InterfaceReport::new();
    report.insert(
        "eth0".into(),
        ReportedInterface {
            kind: InterfaceType::Physical,
            mac_address: Some("52:54:00:00:00:01".into()),
            parents: Vec::new(),
            links: vec![ReportedLink {
                mode: LinkMode::Static,
                address: Some("10.0.0.2/24".parse().unwrap()),
                gateway: None,
            }],
            enabled: true,
            vid: None,
            monitored: false,
        },
    );
    report
}

/// A rack registered with a fresh region, serving DHCP on the VLAN of
/// its only interface.
async fn registered(server: impl FnOnce(&TempDir) -> Arc<dyn DhcpServer>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let secret = SharedSecret::new(b"s3cret".to_vec());
    let monitor = Arc::new(ServiceMonitor::new(server(&dir)));
    let rack = Arc::new(RackResponder::new("", secret.clone(), monitor, Duration::from_secs(5)));
    let config = ClusterConfig::new(Vec::new(), "rack1", secret.clone(), dir.path());
    let service =
        ClusterClientService::new(config, Arc::clone(&rack), Arc::new(StaticInterfaces(report()))).unwrap();

    let region = Region::new(Arc::new(DataStore::new()), secret, "region:pid=1");
    let (rack_side, region_side) = region
        .connect_loopback(Arc::clone(&rack) as Arc<dyn Responder>, ConnectionOptions::default())
        .await;
    let registration = service.attach(Arc::clone(&rack_side)).await.unwrap();

    let store = region.store();
    let node = store.node_by_system_id(&registration.system_id).unwrap();
    let eth0 = store.interfaces_on_node(node.id).pop().unwrap();
    let mut vlan = (*store.vlan(eth0.vlan_id.unwrap()).unwrap()).clone();
    vlan.dhcp_on = true;
    vlan.primary_rack = Some(node.id);
    store.save_vlan(vlan);

    Fixture {
        region,
        rack,
        node: node.id,
        dir,
        rack_side,
        _service: service,
        _region_side: region_side,
    }
}

fn delivery(region: &Region, options: DeliveryOptions) -> DhcpDelivery {
    DhcpDelivery::new(
        Arc::clone(region.store()),
        Arc::clone(region.racks()) as Arc<dyn RackClients>,
        options,
    )
}

/// Poll `check` until it holds or a second passes.
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn status(region: &Region, node: NodeId, service: &str) -> Option<(ServiceStatus, String)> {
    region
        .store()
        .service(node, service)
        .map(|record| (record.status, record.status_info.clone()))
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn configured_families_report_running_or_off() {
    let fixture = registered(|dir| Arc::new(FileDhcpServer::new(dir.path().join("dhcp")))).await;
    assert_eq!(fixture.region.racks().connected_racks().len(), 1);

    delivery(&fixture.region, DeliveryOptions::default())
        .configure_dhcp(fixture.node)
        .await
        .unwrap();

    assert_eq!(
        status(&fixture.region, fixture.node, "dhcpd"),
        Some((ServiceStatus::Running, String::new()))
    );
    assert_eq!(
        status(&fixture.region, fixture.node, "dhcpd6"),
        Some((ServiceStatus::Off, String::new()))
    );

    let state = fixture.rack.monitor().state();
    assert!(state.v4);
    assert!(!state.v6);
    let written = FileDhcpServer::new(fixture.dir.path().join("dhcp"));
    assert!(written.config_path(IpFamily::V4).exists());
    assert!(!written.config_path(IpFamily::V6).exists());
}

#[tokio::test]
async fn rack_failure_marks_the_service_dead() {
    let fixture = registered(|_| Arc::new(BrokenServer)).await;

    let err = delivery(&fixture.region, DeliveryOptions::default())
        .configure_dhcp(fixture.node)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::DeliveryFailed { ref service, .. } if service == "dhcpd"));

    let (v4, info) = status(&fixture.region, fixture.node, "dhcpd").unwrap();
    assert_eq!(v4, ServiceStatus::Dead);
    assert!(info.contains("disk full"), "status info: {info}");
    assert_eq!(
        status(&fixture.region, fixture.node, "dhcpd6").map(|(status, _)| status),
        Some(ServiceStatus::Off)
    );
}

#[tokio::test]
async fn disabled_delivery_leaves_racks_alone() {
    let fixture = registered(|dir| Arc::new(FileDhcpServer::new(dir.path().join("dhcp")))).await;
    let options = DeliveryOptions {
        enabled: false,
        ..DeliveryOptions::default()
    };

    delivery(&fixture.region, options)
        .configure_dhcp(fixture.node)
        .await
        .unwrap();

    assert!(status(&fixture.region, fixture.node, "dhcpd").is_none());
    assert!(!fixture.rack.monitor().state().v4);
}

#[tokio::test]
async fn unreachable_rack_keeps_its_status() {
    let store = Arc::new(DataStore::new());
    let node = NodeId(store.next_id());
    store.save_node(Node {
        id: node,
        system_id: "offline".into(),
        hostname: "rack9".into(),
        kind: NodeKind::RackController,
        version: None,
    });
    let region = Region::new(store, SharedSecret::new(b"s3cret".to_vec()), "region:pid=1");

    let err = delivery(&region, DeliveryOptions::default())
        .configure_dhcp(node)
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::NoConnectionsAvailable));
    assert!(status(&region, node, "dhcpd").is_none());
    assert!(status(&region, node, "dhcpd6").is_none());
}

#[tokio::test]
async fn topology_changes_trigger_redelivery() {
    let fixture = registered(|dir| Arc::new(FileDhcpServer::new(dir.path().join("dhcp")))).await;
    let cancel = CancellationToken::new();
    let watch = delivery(&fixture.region, DeliveryOptions::default()).spawn_watch(cancel.clone());
    assert!(status(&fixture.region, fixture.node, "dhcpd").is_none());

    let store = fixture.region.store();
    let eth0 = store.interfaces_on_node(fixture.node).pop().unwrap();
    let mut vlan = (*store.vlan(eth0.vlan_id.unwrap()).unwrap()).clone();
    vlan.mtu = 9000;
    store.save_vlan(vlan);

    let region = Arc::clone(&fixture.region);
    let node = fixture.node;
    assert!(
        eventually(move || status(&region, node, "dhcpd").is_some_and(|(s, _)| s == ServiceStatus::Running))
            .await
    );
    assert!(fixture.rack.monitor().state().v4);

    cancel.cancel();
    watch.await.unwrap();
}

#[tokio::test]
async fn validation_checks_a_draft_snippet_without_applying() {
    let fixture = registered(|_| Arc::new(PickyServer)).await;
    let delivery = delivery(&fixture.region, DeliveryOptions::default());

    assert!(delivery.validate_dhcp(fixture.node, None).await.unwrap().is_sound());

    let draft = DhcpSnippet {
        id: SnippetId(900),
        name: "draft".into(),
        description: String::new(),
        value: "option domain-search \"lab\";".into(),
        enabled: true,
        scope: SnippetScope::Global,
    };
    let validation = delivery.validate_dhcp(fixture.node, Some(draft)).await.unwrap();
    assert!(!validation.is_sound());
    assert_eq!(validation.v4.len(), 1);
    assert_eq!(validation.v4[0].error, "rejected snippet draft");
    assert!(validation.v6.is_empty());

    assert!(status(&fixture.region, fixture.node, "dhcpd").is_none());
    assert!(!fixture.rack.monitor().state().v4);
}

#[tokio::test]
async fn slow_rack_is_recorded_as_timed_out() {
    let fixture = registered(|_| Arc::new(SlowServer)).await;
    let options = DeliveryOptions {
        timeout: Duration::from_millis(100),
        ..DeliveryOptions::default()
    };

    let err = delivery(&fixture.region, options)
        .configure_dhcp(fixture.node)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "dhcpd configuration failed: timed out");
    assert_eq!(
        status(&fixture.region, fixture.node, "dhcpd"),
        Some((ServiceStatus::Dead, "timed out".to_owned()))
    );
}

#[tokio::test]
async fn channel_closed_mid_call_is_dropped() {
    let started = Arc::new(Notify::new());
    let server_started = Arc::clone(&started);
    let fixture = registered(move |_| {
        Arc::new(StalledServer {
            started: server_started,
        })
    })
    .await;
    let system_id = fixture.region.store().node(fixture.node).unwrap().system_id.clone();
    assert_eq!(fixture.region.racks().connections(&system_id).len(), 1);

    let delivery = delivery(&fixture.region, DeliveryOptions::default());
    let call = tokio::spawn({
        let delivery = delivery.clone();
        let node = fixture.node;
        async move { delivery.configure_dhcp(node).await }
    });
    started.notified().await;
    fixture.rack_side.close();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, CoreError::ConnectionFailed { .. }), "unexpected error: {err}");
    assert!(fixture.region.racks().connections(&system_id).is_empty());
    assert_eq!(
        status(&fixture.region, fixture.node, "dhcpd").map(|(status, _)| status),
        Some(ServiceStatus::Dead)
    );

    let region = Arc::clone(&fixture.region);
    assert!(eventually(move || region.racks().connected_racks().is_empty()).await);
    assert!(matches!(
        delivery.configure_dhcp(fixture.node).await,
        Err(CoreError::NoConnectionsAvailable)
    ));
}

#[tokio::test]
async fn overlapping_delivery_leaves_the_record_alone() {
    let started = Arc::new(Notify::new());
    let server_started = Arc::clone(&started);
    let fixture = registered(move |_| {
        Arc::new(StalledServer {
            started: server_started,
        })
    })
    .await;
    let delivery = delivery(&fixture.region, DeliveryOptions::default());
    let first = tokio::spawn({
        let delivery = delivery.clone();
        let node = fixture.node;
        async move { delivery.configure_dhcp(node).await }
    });
    started.notified().await;

    let err = delivery.configure_dhcp(fixture.node).await.unwrap_err();

    assert!(matches!(err, CoreError::AlreadyInProgress { .. }), "unexpected error: {err}");
    assert!(status(&fixture.region, fixture.node, "dhcpd").is_none());
    first.abort();
}
