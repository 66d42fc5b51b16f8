//! Ingest stage
//!
//! Accepts samples from a telemetry source, validates them, enforces
//! timestamp monotonicity and appends them to the ring buffer. Malformed or
//! stale samples are dropped and counted; the buffer is the only side
//! effect.

use orc_core::buffer::TelemetryRing;
use orc_core::config::BufferConfig;
use orc_core::model::TelemetrySample;
use tracing::debug;

/// Why a sample was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Timestamp at or before the last accepted sample (clock jumped back
    /// or the sample arrived late).
    StaleTimestamp,
    /// A required numeric field is missing, NaN or out of band.
    Malformed,
}

/// Outcome of `Ingest::push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Rejected(RejectReason),
}

/// Drop counters, surfaced through the status endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestStats {
    pub accepted: u64,
    pub stale: u64,
    pub malformed: u64,
}

pub struct Ingest {
    ring: TelemetryRing,
    last_timestamp: Option<f64>,
    stats: IngestStats,
}

impl Ingest {
    pub fn new(buffer: &BufferConfig) -> Self {
        Self {
            ring: TelemetryRing::new(buffer.capacity()),
            last_timestamp: None,
            stats: IngestStats::default(),
        }
    }

    /// Validate and append a sample. Sources normalize units before this
    /// point; this is the last line of defence against NaN and
    /// out-of-band values.
    pub fn push(&mut self, mut sample: TelemetrySample) -> PushOutcome {
        if let Some(reason) = validate(&sample) {
            self.stats.malformed += 1;
            debug!(reason, "dropping malformed sample");
            return PushOutcome::Rejected(RejectReason::Malformed);
        }

        if let Some(last) = self.last_timestamp {
            if sample.timestamp < last {
                // Clock jumped backward; keep the last accepted timestamp.
                self.stats.stale += 1;
                return PushOutcome::Rejected(RejectReason::StaleTimestamp);
            }
        }

        // Defensive clamps on the inputs detectors gate on.
        sample.throttle = sample.throttle.clamp(0.0, 1.0);
        sample.brake = sample.brake.clamp(0.0, 1.0);
        sample.lap_dist_pct = sample.lap_dist_pct.rem_euclid(1.0);

        self.last_timestamp = Some(sample.timestamp);
        self.ring.push(sample);
        self.stats.accepted += 1;
        PushOutcome::Accepted
    }

    /// Copy-on-read view of the trailing window; empty when nothing is in
    /// range.
    pub fn snapshot(&self, window_s: f64) -> Vec<TelemetrySample> {
        self.ring.snapshot(window_s)
    }

    pub fn last_n(&self, n: usize) -> Vec<TelemetrySample> {
        self.ring.last_n(n)
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.ring.latest()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }
}

/// Returns a short reason string when the sample is malformed.
fn validate(sample: &TelemetrySample) -> Option<&'static str> {
    let finite = [
        ("timestamp", sample.timestamp),
        ("lap_dist_pct", sample.lap_dist_pct),
        ("speed", sample.speed_mps),
        ("rpm", sample.rpm),
        ("throttle", sample.throttle),
        ("brake", sample.brake),
        ("steering", sample.steering_rad),
        ("yaw_rate", sample.yaw_rate_rps),
        ("lat_accel", sample.lat_accel_g),
        ("long_accel", sample.long_accel_g),
        ("fuel", sample.fuel_level_l),
    ];
    for (name, value) in finite {
        if !value.is_finite() {
            return Some(name);
        }
    }
    if sample.speed_mps < 0.0 {
        return Some("negative speed");
    }
    if sample.rpm < 0.0 {
        return Some("negative rpm");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::{SessionPhase, TrackSurface};

    fn sample(ts: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            lap: 1,
            lap_dist_pct: 0.5,
            speed_mps: 40.0,
            rpm: 5000.0,
            gear: 3,
            throttle: 0.5,
            brake: 0.0,
            steering_rad: 0.0,
            yaw_rate_rps: 0.0,
            lat_accel_g: 0.0,
            long_accel_g: 0.0,
            vert_accel_g: -1.0,
            velocity_x_mps: 40.0,
            velocity_y_mps: 0.0,
            tire_pressures_kpa: [170.0; 4],
            tire_temps_c: None,
            fuel_level_l: 30.0,
            fuel_use_per_hour_l: 25.0,
            on_pit_road: false,
            track_surface: TrackSurface::OnTrack,
            session_phase: SessionPhase::Racing,
            session_flags: 0,
            last_lap_time_s: None,
            current_lap_time_s: None,
            track_name: None,
            car_name: None,
        }
    }

    #[test]
    fn accepts_monotonic_samples() {
        let mut ingest = Ingest::new(&BufferConfig::default());
        assert_eq!(ingest.push(sample(1.0)), PushOutcome::Accepted);
        assert_eq!(ingest.push(sample(1.016)), PushOutcome::Accepted);
        assert_eq!(ingest.stats().accepted, 2);
    }

    #[test]
    fn rejects_backward_clock() {
        let mut ingest = Ingest::new(&BufferConfig::default());
        ingest.push(sample(5.0));
        assert_eq!(
            ingest.push(sample(4.0)),
            PushOutcome::Rejected(RejectReason::StaleTimestamp)
        );
        // The last accepted timestamp is kept: a later sample still passes.
        assert_eq!(ingest.push(sample(5.1)), PushOutcome::Accepted);
        assert_eq!(ingest.stats().stale, 1);
    }

    #[test]
    fn rejects_nan_fields() {
        let mut ingest = Ingest::new(&BufferConfig::default());
        let mut bad = sample(1.0);
        bad.speed_mps = f64::NAN;
        assert_eq!(ingest.push(bad), PushOutcome::Rejected(RejectReason::Malformed));
        assert_eq!(ingest.stats().malformed, 1);
        assert!(ingest.snapshot(10.0).is_empty());
    }

    #[test]
    fn clamps_pedals_and_wraps_fraction() {
        let mut ingest = Ingest::new(&BufferConfig::default());
        let mut s = sample(1.0);
        s.throttle = 1.2;
        s.lap_dist_pct = 1.25;
        ingest.push(s);
        let latest = ingest.latest().unwrap();
        assert_eq!(latest.throttle, 1.0);
        assert!((latest.lap_dist_pct - 0.25).abs() < 1e-9);
    }
}
