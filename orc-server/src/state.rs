//! Application state management

use orc_coach::engine::{CoachingEngine, EnrichRequest};
use orc_coach::queue::MessageQueue;
use orc_core::model::{CoachingMessage, TelemetrySample};
use orc_core::source::TelemetrySource;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The coaching engine, owned by the analysis task; the API takes the
    /// lock briefly for status and mode changes.
    pub engine: Arc<Mutex<CoachingEngine>>,

    /// The message queue shared between analysis and delivery.
    pub queue: Arc<std::sync::Mutex<MessageQueue>>,

    /// All registered telemetry sources.
    pub sources: Arc<RwLock<Vec<Box<dyn TelemetrySource>>>>,

    /// Key of the currently active source.
    pub active_source: Arc<RwLock<Option<String>>>,

    /// Raw samples flowing from the source manager to the analysis task.
    pub sample_tx: mpsc::Sender<TelemetrySample>,

    /// Enrichment requests flowing from analysis to the LLM task.
    pub enrich_tx: mpsc::Sender<EnrichRequest>,

    /// Broadcast channels feeding the WebSocket streams (pre-serialized
    /// envelope JSON).
    pub telemetry_tx: broadcast::Sender<String>,
    pub session_tx: broadcast::Sender<String>,
    pub coaching_tx: broadcast::Sender<String>,

    /// Delivered coaching messages, newest last, for `getHistory`.
    pub history: Arc<RwLock<Vec<CoachingMessage>>>,

    /// Monotonic timestamp of the most recent accepted sample; the
    /// delivery task's clock.
    pub latest_timestamp: Arc<RwLock<f64>>,

    /// Cooperative shutdown for all session tasks.
    pub cancel: CancellationToken,
}

pub const HISTORY_CAP: usize = 200;

impl AppState {
    pub fn new(
        engine: CoachingEngine,
    ) -> (Self, mpsc::Receiver<TelemetrySample>, mpsc::Receiver<EnrichRequest>) {
        let queue = engine.queue_handle();
        let (sample_tx, sample_rx) = mpsc::channel(256);
        let (enrich_tx, enrich_rx) = mpsc::channel(32);
        let (telemetry_tx, _) = broadcast::channel(128);
        let (session_tx, _) = broadcast::channel(16);
        let (coaching_tx, _) = broadcast::channel(64);

        let state = Self {
            engine: Arc::new(Mutex::new(engine)),
            queue,
            sources: Arc::new(RwLock::new(Vec::new())),
            active_source: Arc::new(RwLock::new(None)),
            sample_tx,
            enrich_tx,
            telemetry_tx,
            session_tx,
            coaching_tx,
            history: Arc::new(RwLock::new(Vec::new())),
            latest_timestamp: Arc::new(RwLock::new(0.0)),
            cancel: CancellationToken::new(),
        };
        (state, sample_rx, enrich_rx)
    }

    /// Register a telemetry source.
    pub async fn register_source(&self, source: Box<dyn TelemetrySource>) {
        let mut sources = self.sources.write().await;
        sources.push(source);
    }

    /// Record a delivered message into the bounded history.
    pub async fn record_delivery(&self, message: CoachingMessage) {
        let mut history = self.history.write().await;
        history.push(message);
        if history.len() > HISTORY_CAP {
            let excess = history.len() - HISTORY_CAP;
            history.drain(..excess);
        }
    }
}
