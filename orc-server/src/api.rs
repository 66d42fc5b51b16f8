//! WebSocket API and support routes
//!
//! One WebSocket endpoint per stream (`/ws/telemetry`, `/ws/session`,
//! `/ws/coaching`), each sending a `connected` envelope on handshake and
//! answering client requests (`getStatus`, `getHistory`, `setCoachingMode`,
//! `getCoachingStats`); unknown request types get an `error` reply. Plain
//! HTTP mirrors of the status payloads exist for tooling.

use crate::state::AppState;
use crate::wire;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::debug;

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/api/status", get(http_status))
        .route("/api/sources", get(list_sources))
        .route("/ws/telemetry", get(ws_telemetry))
        .route("/ws/session", get(ws_session))
        .route("/ws/coaching", get(ws_coaching))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

// === Source listing ===

#[derive(Serialize)]
struct SourceInfo {
    key: String,
    name: String,
    detected: bool,
    active: bool,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceInfo>> {
    let sources = state.sources.read().await;
    let info = sources
        .iter()
        .map(|s| SourceInfo {
            key: s.key().to_string(),
            name: s.name().to_string(),
            detected: s.detect(),
            active: s.is_active(),
        })
        .collect();
    Json(info)
}

// === Status payloads ===

async fn status_payload(state: &AppState) -> Value {
    let engine = state.engine.lock().await;
    let ingest = engine.ingest_stats();
    let queue = engine.queue_stats();
    let active_source = state.active_source.read().await.clone();
    json!({
        "sessionActive": engine.session_active(),
        "trackName": engine.track_name(),
        "carName": engine.car_name(),
        "baselineEstablished": engine.baseline_established(),
        "activeSource": active_source,
        "ingest": {
            "accepted": ingest.accepted,
            "stale": ingest.stale,
            "malformed": ingest.malformed,
        },
        "queue": queue,
    })
}

async fn http_status(State(state): State<AppState>) -> Json<Value> {
    Json(status_payload(&state).await)
}

// === WebSocket streams ===

#[derive(Clone, Copy)]
enum StreamKind {
    Telemetry,
    Session,
    Coaching,
}

impl StreamKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Telemetry => "telemetry",
            Self::Session => "session",
            Self::Coaching => "coaching",
        }
    }
}

async fn ws_telemetry(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, StreamKind::Telemetry))
}

async fn ws_session(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, StreamKind::Session))
}

async fn ws_coaching(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, StreamKind::Coaching))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, kind: StreamKind) {
    if socket.send(Message::Text(wire::connected(kind.name()))).await.is_err() {
        return;
    }

    let mut rx = match kind {
        StreamKind::Telemetry => state.telemetry_tx.subscribe(),
        StreamKind::Session => state.session_tx.subscribe(),
        StreamKind::Coaching => state.coaching_tx.subscribe(),
    };

    // On the session stream, replay the current identity so a late
    // subscriber is not left blank until the next change.
    if matches!(kind, StreamKind::Session) {
        let engine = state.engine.lock().await;
        let info = wire::session_info(
            engine.track_name().as_deref(),
            engine.car_name().as_deref(),
            engine.session_active(),
        );
        drop(engine);
        if socket.send(Message::Text(info)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,

            broadcasted = rx.recv() => match broadcasted {
                Ok(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        // This subscriber is gone; others are unaffected.
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, stream = kind.name(), "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = handle_request(&state, &text).await;
                    if socket.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
        }
    }
}

// === Client requests ===

async fn handle_request(state: &AppState, text: &str) -> String {
    let Ok(request) = serde_json::from_str::<Value>(text) else {
        return wire::error("request is not valid JSON");
    };
    let Some(kind) = request["type"].as_str() else {
        return wire::error("request has no type");
    };

    match kind {
        "getStatus" => {
            let data = status_payload(state).await;
            json!({
                "type": "status",
                "timestamp": chrono::Utc::now().timestamp_millis(),
                "data": data,
            })
            .to_string()
        }
        "getHistory" => {
            let history = state.history.read().await;
            let items: Vec<Value> = history
                .iter()
                .map(|m| serde_json::from_str(&wire::coaching(m)).unwrap_or(Value::Null))
                .collect();
            json!({
                "type": "history",
                "timestamp": chrono::Utc::now().timestamp_millis(),
                "data": items,
            })
            .to_string()
        }
        "setCoachingMode" => {
            let Some(mode) = request["mode"].as_str() else {
                return wire::error("setCoachingMode needs a mode");
            };
            let accepted = {
                let mut engine = state.engine.lock().await;
                engine.set_coaching_mode(mode)
            };
            if accepted {
                json!({
                    "type": "status",
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                    "data": { "coachingMode": mode },
                })
                .to_string()
            } else {
                wire::error("unknown coaching mode")
            }
        }
        "getCoachingStats" => {
            let now = *state.latest_timestamp.read().await;
            let engine = state.engine.lock().await;
            let queue = engine.queue_stats();
            let summary = engine.session_summary(now);
            json!({
                "type": "status",
                "timestamp": chrono::Utc::now().timestamp_millis(),
                "data": {
                    "queue": queue,
                    "sessionSummary": summary,
                },
            })
            .to_string()
        }
        other => wire::error(&format!("unknown request type: {other}")),
    }
}
