//! OpenRaceCoach Server
//!
//! Wires the coaching pipeline to telemetry sources and the UI WebSocket
//! API. Exit codes: 0 clean shutdown, 1 fatal initialization failure,
//! 2 no telemetry source available, 130 on interrupt.

use anyhow::Result;
use std::future::IntoFuture;

use orc_adapters::DemoSource;
use orc_coach::engine::CoachingEngine;
use orc_coach::enrich::{Enricher, OpenAiBackend};
use orc_coach::persist::SessionStore;
use orc_core::config::CoachConfig;
use orc_server::{api, manager, state::AppState, tasks};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:#}");
            1
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<i32> {
    info!("starting OpenRaceCoach server");

    // Configuration: optional JSON file via ORC_CONFIG, data dir override
    // via ORC_DATA_DIR. Validation failures are fatal.
    let config_path = std::env::var("ORC_CONFIG").ok().map(PathBuf::from);
    let mut config = CoachConfig::load(config_path.as_deref())?;
    if let Ok(dir) = std::env::var("ORC_DATA_DIR") {
        config.data_dir = Some(PathBuf::from(dir));
    }
    if std::env::var("OPENAI_API_KEY").map(|k| !k.is_empty()).unwrap_or(false) {
        config.llm.enabled = true;
    }

    let store = SessionStore::new(config.data_dir())?;
    info!(data_dir = %store.data_dir().display(), "persistence ready");

    let backend = OpenAiBackend::from_env(&config.llm)
        .map(|b| Box::new(b) as Box<dyn orc_coach::enrich::ChatBackend>);
    if config.llm.enabled && backend.is_none() {
        warn!("LLM enrichment enabled but OPENAI_API_KEY is not set; coaching stays local");
    }
    let enricher = Enricher::new(config.llm.clone(), backend);

    let engine = CoachingEngine::new(config, store);
    let (state, sample_rx, enrich_rx) = AppState::new(engine);

    // Register telemetry sources. The demo source can be disabled when a
    // real simulator adapter is expected.
    let demo_enabled = std::env::var("ORC_DEMO").map(|v| v != "0").unwrap_or(true);
    if demo_enabled {
        state.register_source(Box::new(DemoSource::new())).await;
    }
    {
        let sources = state.sources.read().await;
        if sources.is_empty() {
            eprintln!("no telemetry source available");
            return Ok(2);
        }
    }

    // Pipeline tasks.
    tokio::spawn(manager::run(state.clone()));
    tokio::spawn(tasks::analysis_task(state.clone(), sample_rx));
    tokio::spawn(tasks::delivery_task(state.clone()));
    tokio::spawn(tasks::llm_task(state.clone(), enricher, enrich_rx));

    // HTTP/WebSocket API.
    let app = api::create_router(state.clone());
    let addr: SocketAddr = std::env::var("ORC_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:9100".to_string())
        .parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    let server = axum::serve(listener, app).into_future();
    let interrupted = tokio::select! {
        result = server => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    // Cooperative shutdown: cancel the tasks, persist the session.
    state.cancel.cancel();
    {
        let mut engine = state.engine.lock().await;
        engine.close_session(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
    }
    info!("shutdown complete");

    Ok(if interrupted { 130 } else { 0 })
}
