//! Sliding-window telemetry buffer
//!
//! Fixed capacity ring (default 30 s at 60 Hz). Single writer, snapshot
//! reads: detectors always work on copies so nothing blocks the writer.

use crate::model::TelemetrySample;
use std::collections::VecDeque;

/// Fixed-capacity ring of telemetry samples ordered by timestamp.
#[derive(Debug)]
pub struct TelemetryRing {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TelemetryRing {
    /// Capacity is `duration_s * rate_hz` samples; the default configuration
    /// is 30 s at 60 Hz = 1800.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn with_window(duration_s: f64, rate_hz: f64) -> Self {
        Self::new((duration_s * rate_hz).round() as usize)
    }

    /// Append a sample, evicting the oldest when full. The caller (ingest)
    /// guarantees timestamp monotonicity.
    pub fn push(&mut self, sample: TelemetrySample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    /// Copy-on-read view of the samples inside the trailing window, oldest
    /// first. Empty when nothing falls inside the window.
    pub fn snapshot(&self, window_s: f64) -> Vec<TelemetrySample> {
        let Some(last) = self.samples.back() else {
            return Vec::new();
        };
        let cutoff = last.timestamp - window_s;
        self.samples
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Copy of the most recent `n` samples, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<TelemetrySample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SessionPhase, TrackSurface};

    fn sample(ts: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            lap: 1,
            lap_dist_pct: 0.0,
            speed_mps: 50.0,
            rpm: 6000.0,
            gear: 4,
            throttle: 0.8,
            brake: 0.0,
            steering_rad: 0.0,
            yaw_rate_rps: 0.0,
            lat_accel_g: 0.0,
            long_accel_g: 0.0,
            vert_accel_g: -1.0,
            velocity_x_mps: 50.0,
            velocity_y_mps: 0.0,
            tire_pressures_kpa: [170.0; 4],
            tire_temps_c: None,
            fuel_level_l: 40.0,
            fuel_use_per_hour_l: 30.0,
            on_pit_road: false,
            track_surface: TrackSurface::OnTrack,
            session_phase: SessionPhase::Racing,
            session_flags: 0,
            last_lap_time_s: None,
            current_lap_time_s: Some(10.0),
            track_name: None,
            car_name: None,
        }
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let mut ring = TelemetryRing::new(3);
        for i in 0..5 {
            ring.push(sample(i as f64));
        }
        assert_eq!(ring.len(), 3);
        let snap = ring.snapshot(100.0);
        assert_eq!(snap.first().map(|s| s.timestamp), Some(2.0));
        assert_eq!(snap.last().map(|s| s.timestamp), Some(4.0));
    }

    #[test]
    fn snapshot_respects_window() {
        let mut ring = TelemetryRing::new(100);
        for i in 0..10 {
            ring.push(sample(i as f64 * 0.5));
        }
        // Last timestamp 4.5; 1 s window keeps 3.5, 4.0, 4.5.
        let snap = ring.snapshot(1.0);
        assert_eq!(snap.len(), 3);
    }

    #[test]
    fn snapshot_empty_when_no_samples() {
        let ring = TelemetryRing::new(10);
        assert!(ring.snapshot(5.0).is_empty());
    }

    #[test]
    fn last_n_returns_tail_in_order() {
        let mut ring = TelemetryRing::new(10);
        for i in 0..6 {
            ring.push(sample(i as f64));
        }
        let tail = ring.last_n(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp, 4.0);
        assert_eq!(tail[1].timestamp, 5.0);
    }
}
