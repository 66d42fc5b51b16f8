//! Telemetry source lifecycle manager
//!
//! Polls registered sources for simulator detection, starts and stops them
//! as simulators come and go, and pumps samples from the active source into
//! the analysis task at ~60 Hz.

use crate::state::AppState;
use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

const DETECTION_INTERVAL: Duration = Duration::from_secs(1);
const SAMPLE_INTERVAL: Duration = Duration::from_millis(16); // ~60 Hz

/// Main manager loop; runs until the state's cancellation token fires.
pub async fn run(state: AppState) {
    info!("source manager started");
    let mut last_detection = Instant::now() - DETECTION_INTERVAL;

    loop {
        if state.cancel.is_cancelled() {
            break;
        }

        if last_detection.elapsed() >= DETECTION_INTERVAL {
            last_detection = Instant::now();
            if let Err(e) = detection_cycle(&state).await {
                error!("detection cycle failed: {e}");
            }
        }

        if let Err(e) = sample_cycle(&state).await {
            error!("sample cycle failed: {e}");
        }

        tokio::select! {
            _ = state.cancel.cancelled() => break,
            _ = sleep(SAMPLE_INTERVAL) => {}
        }
    }
    info!("source manager stopped");
}

/// Start the first detected source, or stop the active one when its
/// simulator goes away.
async fn detection_cycle(state: &AppState) -> Result<()> {
    let mut sources = state.sources.write().await;
    let mut active = state.active_source.write().await;

    if let Some(active_key) = active.clone() {
        if let Some(source) = sources.iter_mut().find(|s| s.key() == active_key) {
            if !source.detect() {
                info!(source = source.name(), "simulator no longer detected, stopping source");
                if let Err(e) = source.stop() {
                    error!(source = source.name(), "error stopping source: {e}");
                }
                *active = None;
            }
        }
        return Ok(());
    }

    for source in sources.iter_mut() {
        if source.detect() && !source.is_active() {
            info!(source = source.name(), "simulator detected, starting source");
            match source.start() {
                Ok(()) => {
                    *active = Some(source.key().to_string());
                    break;
                }
                Err(e) => error!(source = source.name(), "failed to start source: {e}"),
            }
        }
    }
    Ok(())
}

/// Read a sample from the active source and hand it to the analysis task.
async fn sample_cycle(state: &AppState) -> Result<()> {
    let active_key = { state.active_source.read().await.clone() };
    let Some(active_key) = active_key else {
        return Ok(());
    };

    let sample = {
        let mut sources = state.sources.write().await;
        let Some(source) = sources.iter_mut().find(|s| s.key() == active_key) else {
            return Ok(());
        };
        match source.read_sample() {
            Ok(sample) => sample,
            Err(e) => {
                warn!(source = %active_key, "error reading sample: {e}");
                None
            }
        }
    };

    if let Some(sample) = sample {
        // Back-pressure: if the analysis task stalls, drop rather than
        // block the read loop.
        if state.sample_tx.try_send(sample).is_err() {
            warn!("sample channel full; dropping sample");
        }
    }
    Ok(())
}
