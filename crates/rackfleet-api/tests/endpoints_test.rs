#![allow(clippy::unwrap_used)]
// Integration tests for `EndpointClient` using wiremock.

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use rackfleet_api::{EndpointClient, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, EndpointClient, Url) {
    let server = MockServer::start().await;
    let base = Url::parse(&format!("{}/MAAS", server.uri())).unwrap();
    (server, EndpointClient::with_client(reqwest::Client::new()), base)
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_eventloops() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/MAAS/rpc/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "eventloops": {
                "region-a:pid=100": [["10.0.0.1", 5250], ["fd00::1", 5250]],
                "region-a:pid=101": [["10.0.0.1", 5251]]
            }
        })))
        .mount(&server)
        .await;

    let info = client.fetch(&base).await.unwrap();
    assert!(info.is_ready());
    assert_eq!(info.eventloop_count(), 2);
    let loops = info.eventloops.unwrap();
    assert_eq!(
        loops["region-a:pid=100"],
        vec![("10.0.0.1".to_string(), 5250), ("fd00::1".to_string(), 5250)]
    );
}

#[tokio::test]
async fn test_service_unavailable_means_not_ready() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/MAAS/rpc/"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let info = client.fetch(&base).await.unwrap();
    assert!(!info.is_ready());
}

#[tokio::test]
async fn test_bad_gateway_means_not_ready() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/MAAS/rpc/"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    assert_eq!(client.fetch(&base).await.unwrap().eventloops, None);
}

#[tokio::test]
async fn test_other_status_is_error() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/MAAS/rpc/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let result = client.fetch(&base).await;
    assert!(
        matches!(result, Err(Error::Http { status: 404, .. })),
        "expected Http error, got: {result:?}"
    );
}

#[tokio::test]
async fn test_garbage_body_is_deserialization_error() {
    let (server, client, base) = setup().await;

    Mock::given(method("GET"))
        .and(path("/MAAS/rpc/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let result = client.fetch(&base).await;
    assert!(
        matches!(result, Err(Error::Deserialization { ref body, .. }) if body == "<html>"),
        "got: {result:?}"
    );
}
