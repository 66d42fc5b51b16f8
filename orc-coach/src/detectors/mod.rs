//! Pattern detectors
//!
//! Each detector consumes a snapshot of the telemetry ring (2-5 s windows)
//! and produces zero or more `PatternInsight`s. Detectors are independent
//! and share only the snapshot; they keep their own rolling state and never
//! raise — on anything unexpected they return an empty vector.

pub mod braking;
pub mod consistency;
pub mod dynamics;
pub mod handling;
pub mod offtrack;
pub mod shifting;

use orc_core::model::{PatternInsight, TelemetrySample};

pub use braking::BrakingDetector;
pub use consistency::ConsistencyDetector;
pub use dynamics::DynamicsDetector;
pub use handling::HandlingDetector;
pub use offtrack::OffTrackDetector;
pub use shifting::ShiftDetector;

/// Read-only context handed to every detector alongside the snapshot.
pub struct DetectorContext<'a> {
    /// Id of the enclosing corner segment, when the car is in one.
    pub corner_id: Option<&'a str>,
    /// Display name of the enclosing corner segment.
    pub corner_name: Option<&'a str>,
    /// Whether the session baseline has been established. Some detectors
    /// hold their tongue before that point.
    pub baseline_established: bool,
}

/// A sample-driven pattern detector.
pub trait Detector: Send {
    fn name(&self) -> &'static str;

    /// Scan the snapshot (oldest first, ending at the newest sample) and
    /// return any insights. Must not panic; empty on insufficient data.
    fn scan(&mut self, snapshot: &[TelemetrySample], cx: &DetectorContext<'_>)
        -> Vec<PatternInsight>;
}

/// Mean of an iterator of f64s; 0.0 when empty.
pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population variance; 0.0 when fewer than two values.
pub(crate) fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub(crate) fn stddev(values: &[f64]) -> f64 {
    variance(values).sqrt()
}
