//! Pipeline tasks
//!
//! Three long-running tasks per session, joined by channels:
//! the analysis task drains the sample channel through the engine, the
//! delivery task polls the message queue and fans deliveries out to
//! subscribers, and the optional LLM task services enrichment requests.
//! The source manager (`manager.rs`) is the root producer.

use crate::state::AppState;
use crate::wire;
use orc_coach::engine::EnrichRequest;
use orc_coach::enrich::Enricher;
use orc_core::model::TelemetrySample;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Drains raw samples through the coaching engine; publishes processed
/// telemetry and session changes, forwards enrichment requests.
pub async fn analysis_task(state: AppState, mut samples: mpsc::Receiver<TelemetrySample>) {
    info!("analysis task started");
    loop {
        let sample = tokio::select! {
            _ = state.cancel.cancelled() => break,
            received = samples.recv() => match received {
                Some(sample) => sample,
                None => break,
            },
        };

        let (output, session_active, track, car) = {
            let mut engine = state.engine.lock().await;
            let output = engine.process_sample(sample.clone());
            (output, engine.session_active(), engine.track_name(), engine.car_name())
        };

        if !output.accepted {
            continue;
        }

        {
            let mut latest = state.latest_timestamp.write().await;
            *latest = sample.timestamp;
        }

        // Fan out the processed sample; a lagging or absent subscriber is
        // not an error.
        let _ = state.telemetry_tx.send(wire::telemetry(&sample, session_active));

        if output.session_changed {
            let _ = state.session_tx.send(wire::session_info(
                track.as_deref(),
                car.as_deref(),
                session_active,
            ));
        }

        for request in output.enrich_requests {
            if state.enrich_tx.try_send(request).is_err() {
                debug!("enrichment channel full; dropping request");
            }
        }
    }
    info!("analysis task stopped");
}

/// Polls the queue at ≥ 5 Hz and broadcasts deliverable messages.
pub async fn delivery_task(state: AppState) {
    info!("delivery task started");
    let mut tick = tokio::time::interval(std::time::Duration::from_millis(150));
    loop {
        tokio::select! {
            _ = state.cancel.cancelled() => break,
            _ = tick.tick() => {}
        }

        let now = *state.latest_timestamp.read().await;
        let delivered = {
            let mut queue = match state.queue.lock() {
                Ok(queue) => queue,
                Err(_) => continue,
            };
            queue.dequeue(now)
        };

        if let Some(message) = delivered {
            debug!(category = message.category.as_str(), "delivering coaching message");
            // Subscriber failures drop that subscriber, never the loop.
            let _ = state.coaching_tx.send(wire::coaching(&message));
            state.record_delivery(message).await;
        }
    }
    info!("delivery task stopped");
}

/// Services enrichment requests; the result (enriched or fallback) is
/// enqueued like any other message.
pub async fn llm_task(state: AppState, mut enricher: Enricher, mut requests: mpsc::Receiver<EnrichRequest>) {
    info!("llm task started (available: {})", enricher.is_available());
    loop {
        let request = tokio::select! {
            _ = state.cancel.cancelled() => break,
            received = requests.recv() => match received {
                Some(request) => request,
                None => break,
            },
        };

        let now = *state.latest_timestamp.read().await;
        let message = enricher
            .enrich(request.fallback, &request.insight, &request.context, now)
            .await;

        if let Ok(mut queue) = state.queue.lock() {
            queue.enqueue(message);
        }
    }
    info!("llm task stopped");
}
