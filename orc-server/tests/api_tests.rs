//! Integration tests for the orc-server HTTP API
//!
//! Uses tower::ServiceExt::oneshot to exercise routes without binding a
//! port.

use axum::body::Body;
use http_body_util::BodyExt;
use hyper::Request;
use orc_coach::engine::CoachingEngine;
use orc_coach::persist::SessionStore;
use orc_core::config::CoachConfig;
use orc_core::model::{CoachingMessage, MessageCategory, MessagePriority, MessageSource};
use orc_server::{api::create_router, state::AppState};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tower::ServiceExt;

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_dir() -> PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("orc-api-tests-{}-{n}", std::process::id()))
}

/// Helper: build a router plus the state behind it.
fn app_with_state() -> (axum::Router, AppState, PathBuf) {
    let dir = scratch_dir();
    let store = SessionStore::new(dir.clone()).expect("store");
    let engine = CoachingEngine::new(CoachConfig::default(), store);
    let (state, _sample_rx, _enrich_rx) = AppState::new(engine);
    (create_router(state.clone()), state, dir)
}

async fn body_string(body: Body) -> String {
    let collected = body.collect().await.unwrap();
    String::from_utf8(collected.to_bytes().to_vec()).unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok() {
    let (app, _state, dir) = app_with_state();
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(body_string(response.into_body()).await, "ok");
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_status_reports_idle_pipeline() {
    let (app, _state, dir) = app_with_state();
    let response = app
        .oneshot(Request::builder().uri("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body = body_string(response.into_body()).await;
    let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed["sessionActive"], false);
    assert_eq!(parsed["baselineEstablished"], false);
    assert_eq!(parsed["ingest"]["accepted"], 0);
    assert!(parsed["activeSource"].is_null());
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_sources_empty_then_registered() {
    let (app, state, dir) = app_with_state();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/sources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let parsed: serde_json::Value =
        serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 0);

    state.register_source(Box::new(orc_adapters::DemoSource::new())).await;

    let response = app
        .oneshot(Request::builder().uri("/api/sources").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let parsed: serde_json::Value =
        serde_json::from_str(&body_string(response.into_body()).await).unwrap();
    let sources = parsed.as_array().unwrap();
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0]["name"], "Demo");
    assert_eq!(sources[0]["detected"], true);
    assert_eq!(sources[0]["active"], false);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_ws_route_rejects_plain_http() {
    let (app, _state, dir) = app_with_state();
    let response = app
        .oneshot(Request::builder().uri("/ws/telemetry").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(
        response.status().is_client_error(),
        "plain GET without an upgrade must be rejected, got {}",
        response.status()
    );
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (app, _state, dir) = app_with_state();
    let response = app
        .oneshot(Request::builder().uri("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_history_is_bounded() {
    let (_app, state, dir) = app_with_state();
    for i in 0..(orc_server::state::HISTORY_CAP + 50) {
        state
            .record_delivery(CoachingMessage::new(
                format!("message {i}"),
                MessageCategory::General,
                MessagePriority::Low,
                MessageSource::Local,
                0.8,
                "test",
                i as f64,
            ))
            .await;
    }
    let history = state.history.read().await;
    assert_eq!(history.len(), orc_server::state::HISTORY_CAP);
    assert_eq!(history.last().unwrap().content, format!("message {}", orc_server::state::HISTORY_CAP + 49));
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_coaching_broadcast_reaches_subscriber() {
    let (_app, state, dir) = app_with_state();
    let mut rx = state.coaching_tx.subscribe();

    let message = CoachingMessage::new(
        "Brake later into Turn 1",
        MessageCategory::Braking,
        MessagePriority::High,
        MessageSource::Local,
        0.9,
        "late_braking",
        5.0,
    );
    state.coaching_tx.send(orc_server::wire::coaching(&message)).unwrap();

    let received = rx.recv().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&received).unwrap();
    assert_eq!(parsed["type"], "coaching");
    assert_eq!(parsed["data"]["category"], "braking");
    assert_eq!(parsed["data"]["priority"], 2);
    let _ = std::fs::remove_dir_all(&dir);
}
