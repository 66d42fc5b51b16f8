//! Telemetry source trait definition

use crate::model::TelemetrySample;
use anyhow::Result;

/// Trait for simulator-specific telemetry sources
///
/// Each source is responsible for:
/// - Detecting whether its simulator is currently running
/// - Reading raw telemetry from it
/// - Converting the simulator's fields into the unified `TelemetrySample`
///
/// Field normalization (units, pedal scales) happens in the source; range
/// validation and timestamp monotonicity are enforced by the ingest stage.
pub trait TelemetrySource: Send + Sync {
    /// Stable identifier, e.g. "demo", "iracing".
    fn key(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Lightweight check that the simulator is running and reachable.
    fn detect(&self) -> bool;

    /// Start producing telemetry. Called once the simulator is detected.
    fn start(&mut self) -> Result<()>;

    /// Stop producing telemetry and release resources.
    fn stop(&mut self) -> Result<()>;

    /// Read the next sample.
    ///
    /// Returns:
    /// - `Ok(Some(sample))` when a new sample is available
    /// - `Ok(None)` when no new data is ready (non-blocking)
    /// - `Err(_)` on source failure
    fn read_sample(&mut self) -> Result<Option<TelemetrySample>>;

    /// Whether the source is currently active.
    fn is_active(&self) -> bool;
}
