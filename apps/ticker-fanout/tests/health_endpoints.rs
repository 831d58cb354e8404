//! Health Endpoint Integration Tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{FakeUpstream, aggregate_frame, test_config};
use ticker_fanout::{FanoutRuntime, HealthServer, UpstreamTransport};

async fn get(runtime: &FanoutRuntime, uri: &str) -> (StatusCode, Vec<u8>) {
    let app = HealthServer::router(runtime.health_state("test-1.0.0".to_string()));
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(runtime: &FanoutRuntime, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(runtime, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn runtime() -> (FanoutRuntime, tokio::sync::mpsc::UnboundedReceiver<common::ServerEnd>) {
    let (upstream, links) = FakeUpstream::new();
    let transport: Arc<dyn UpstreamTransport> = Arc::new(upstream);
    (
        FanoutRuntime::new(&test_config(), transport, CancellationToken::new()),
        links,
    )
}

#[tokio::test]
async fn liveness_is_always_ok() {
    let (runtime, _links) = runtime();
    let (status, body) = get(&runtime, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"OK");
}

#[tokio::test]
async fn not_ready_until_upstream_connects() {
    let (runtime, mut links) = runtime();

    let (status, body) = get(&runtime, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, b"NOT READY");

    let (status, health) = get_json(&runtime, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "degraded");
    assert_eq!(health["version"], "test-1.0.0");

    runtime.broadcaster.start().unwrap();
    tokio::time::timeout(Duration::from_secs(5), links.recv())
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !runtime.broadcaster.is_connected() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (status, _) = get(&runtime, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    let (_, health) = get_json(&runtime, "/health").await;
    assert_eq!(health["status"], "healthy");

    runtime.broadcaster.stop().await;
}

#[tokio::test]
async fn stats_report_pipeline_counts() {
    let (runtime, mut links) = runtime();
    runtime.broadcaster.start().unwrap();
    let link = tokio::time::timeout(Duration::from_secs(5), links.recv())
        .await
        .unwrap()
        .unwrap();

    let client = runtime.gateway.on_client_connect();
    runtime
        .gateway
        .on_client_subscribe(client.id, vec!["AAPL".to_string(), "MSFT".to_string()])
        .await;
    link.frame(aggregate_frame(&[("AAPL", 150.0)])).await;

    tokio::time::timeout(Duration::from_secs(5), async {
        while runtime.coalescer.is_empty() || runtime.registry.len() < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let (status, stats) = get_json(&runtime, "/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["connected"], true);
    assert_eq!(stats["subscribedSymbolCount"], 2);
    assert_eq!(stats["bufferedSymbolCount"], 1);
    assert_eq!(stats["connectedClientCount"], 1);

    runtime.broadcaster.stop().await;
}
