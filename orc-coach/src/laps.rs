//! Lap and sector detection
//!
//! Turns the raw sample stream into `LapCompleted` and `SectorCompleted`
//! events. Lap boundaries come from the sim's lap counter when it behaves,
//! and from the lap-distance wrap otherwise; a wrap only counts once enough
//! time has elapsed to be a plausible lap.

use orc_core::config::LapConfig;
use orc_core::model::{LapMetadata, LapRecord, SectorRecord, TelemetrySample};
use tracing::{debug, info};

/// Event emitted by the tracker for a processed sample.
#[derive(Debug, Clone)]
pub enum LapEvent {
    LapCompleted(LapRecord),
    SectorCompleted(SectorRecord),
}

pub struct LapTracker {
    config: LapConfig,
    current_lap_number: Option<u32>,
    lap_start_time: Option<f64>,
    sector_index: usize,
    sector_start_time: Option<f64>,
    sector_times: Vec<f64>,
    lap_samples: Vec<TelemetrySample>,
    sector_samples: Vec<TelemetrySample>,
    last_dist_pct: Option<f64>,
    /// All-time best per sector (this process lifetime).
    best_sector_times: Vec<f64>,
    /// Session best per sector.
    session_sector_bests: Vec<f64>,
    track_name: String,
    car_name: String,
}

impl LapTracker {
    pub fn new(config: LapConfig) -> Self {
        let sectors = config.sector_boundaries.len().saturating_sub(1).max(1);
        Self {
            config,
            current_lap_number: None,
            lap_start_time: None,
            sector_index: 0,
            sector_start_time: None,
            sector_times: Vec::new(),
            lap_samples: Vec::new(),
            sector_samples: Vec::new(),
            last_dist_pct: None,
            best_sector_times: vec![f64::INFINITY; sectors],
            session_sector_bests: vec![f64::INFINITY; sectors],
            track_name: String::new(),
            car_name: String::new(),
        }
    }

    pub fn set_context(&mut self, track: &str, car: &str) {
        if track != self.track_name || car != self.car_name {
            self.track_name = track.to_string();
            self.car_name = car.to_string();
            self.session_sector_bests.fill(f64::INFINITY);
        }
    }

    pub fn best_sector_times(&self) -> &[f64] {
        &self.best_sector_times
    }

    /// Feed one sample; returns zero, one or two events (a lap boundary also
    /// closes the final sector, reported inside the `LapRecord`).
    pub fn update(&mut self, sample: &TelemetrySample) -> Vec<LapEvent> {
        let mut events = Vec::new();
        let now = sample.timestamp;

        let lap_boundary = self.is_lap_boundary(sample);

        if lap_boundary {
            if let Some(record) = self.finish_lap(sample) {
                events.push(LapEvent::LapCompleted(record));
            }
            self.start_lap(sample);
        } else if self.lap_start_time.is_none() {
            self.start_lap(sample);
        } else if let Some(sector) = self.check_sector_crossing(sample) {
            events.push(LapEvent::SectorCompleted(sector));
        }

        self.lap_samples.push(sample.clone());
        self.sector_samples.push(sample.clone());
        self.last_dist_pct = Some(sample.lap_dist_pct);
        if self.sector_start_time.is_none() {
            self.sector_start_time = Some(now);
        }

        events
    }

    fn is_lap_boundary(&self, sample: &TelemetrySample) -> bool {
        // A sim-reported lap increment always wins.
        if let Some(current) = self.current_lap_number {
            if sample.lap > current {
                return true;
            }
        }
        // Wrap detection for sims with missing or frozen lap counters.
        if let (Some(last_pct), Some(start)) = (self.last_dist_pct, self.lap_start_time) {
            let decreased = last_pct - sample.lap_dist_pct > self.config.wrap_threshold;
            let plausible = sample.timestamp - start >= self.config.min_lap_time_s;
            if decreased && plausible {
                // Only when the lap counter did not already increment.
                return self
                    .current_lap_number
                    .map(|c| sample.lap <= c)
                    .unwrap_or(true);
            }
        }
        false
    }

    fn start_lap(&mut self, sample: &TelemetrySample) {
        self.current_lap_number = Some(sample.lap);
        self.lap_start_time = Some(sample.timestamp);
        self.sector_index = 0;
        self.sector_start_time = Some(sample.timestamp);
        self.sector_times.clear();
        self.lap_samples.clear();
        self.sector_samples.clear();
        debug!(lap = sample.lap, "started lap");
    }

    fn finish_lap(&mut self, boundary_sample: &TelemetrySample) -> Option<LapRecord> {
        let start = self.lap_start_time?;
        if self.lap_samples.is_empty() {
            return None;
        }
        let now = boundary_sample.timestamp;

        // Close the trailing sector.
        if let Some(sector_start) = self.sector_start_time {
            self.sector_times.push(now - sector_start);
        }

        let mut sector_times = self.sector_times.clone();
        sector_times.truncate(3);
        while sector_times.len() < 3 {
            sector_times.push(0.0);
        }

        // Prefer the sim-reported lap time when it is present and positive.
        let wall_clock = now - start;
        let lap_time = match boundary_sample.last_lap_time_s {
            Some(t) if t > 0.0 => t,
            _ => wall_clock,
        };
        if lap_time <= 0.0 {
            debug!("discarding lap with non-positive time");
            return None;
        }

        // A lap mostly spent on pit road is invalid unless the sim vouched
        // for it with a reported lap time.
        let pit_samples = self.lap_samples.iter().filter(|s| s.on_pit_road).count();
        let mostly_pit = pit_samples * 2 > self.lap_samples.len();
        let sim_reported = matches!(boundary_sample.last_lap_time_s, Some(t) if t > 0.0);
        let is_valid = !mostly_pit || sim_reported;

        let samples = std::mem::take(&mut self.lap_samples);
        let record = LapRecord {
            lap_number: self.current_lap_number.unwrap_or(0),
            lap_time_s: lap_time,
            sector_times_s: sector_times,
            track_name: self.track_name.clone(),
            car_name: self.car_name.clone(),
            completed_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            is_valid,
            metadata: LapMetadata {
                sector_boundaries: self.config.sector_boundaries.clone(),
                sample_count: samples.len(),
            },
            samples,
        };

        info!(
            lap = record.lap_number,
            time = record.lap_time_s,
            valid = record.is_valid,
            "completed lap"
        );
        Some(record)
    }

    fn check_sector_crossing(&mut self, sample: &TelemetrySample) -> Option<SectorRecord> {
        let boundaries = &self.config.sector_boundaries;
        let mut new_sector = boundaries.len() - 2;
        for (i, bound) in boundaries[1..].iter().enumerate() {
            if sample.lap_dist_pct < *bound {
                new_sector = i;
                break;
            }
        }

        // Only forward crossings count; the wrap back to sector 0 is handled
        // by the lap boundary.
        if new_sector == self.sector_index || new_sector < self.sector_index {
            return None;
        }

        let start = self.sector_start_time?;
        let sector_time = sample.timestamp - start;
        let finished = self.sector_index;
        let record = self.build_sector_record(finished, sector_time);

        self.sector_times.push(sector_time);
        if finished < self.best_sector_times.len() {
            if sector_time < self.best_sector_times[finished] {
                self.best_sector_times[finished] = sector_time;
            }
            if sector_time < self.session_sector_bests[finished] {
                self.session_sector_bests[finished] = sector_time;
            }
        }

        self.sector_index = new_sector;
        self.sector_start_time = Some(sample.timestamp);
        self.sector_samples.clear();

        Some(record)
    }

    fn build_sector_record(&self, sector: usize, sector_time: f64) -> SectorRecord {
        let boundaries = &self.config.sector_boundaries;
        let samples = &self.sector_samples;

        let speeds: Vec<f64> = samples.iter().map(|s| s.speed_mps).collect();
        let entry = speeds.first().copied().unwrap_or(0.0);
        let exit = speeds.last().copied().unwrap_or(0.0);
        let min = speeds.iter().copied().fold(f64::INFINITY, f64::min);
        let max = speeds.iter().copied().fold(0.0_f64, f64::max);
        let avg = |f: fn(&TelemetrySample) -> f64| -> f64 {
            if samples.is_empty() {
                0.0
            } else {
                samples.iter().map(f).sum::<f64>() / samples.len() as f64
            }
        };

        SectorRecord {
            sector,
            sector_time_s: sector_time,
            start_pct: boundaries.get(sector).copied().unwrap_or(0.0),
            end_pct: boundaries.get(sector + 1).copied().unwrap_or(1.0),
            entry_speed_mps: entry,
            exit_speed_mps: exit,
            min_speed_mps: if min.is_finite() { min } else { 0.0 },
            max_speed_mps: max,
            avg_throttle: avg(|s| s.throttle),
            avg_brake: avg(|s| s.brake),
            max_steering_rad: samples
                .iter()
                .map(|s| s.steering_rad.abs())
                .fold(0.0, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::{SessionPhase, TrackSurface};

    fn sample(ts: f64, lap: u32, pct: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            lap,
            lap_dist_pct: pct,
            speed_mps: 45.0,
            rpm: 5500.0,
            gear: 4,
            throttle: 0.7,
            brake: 0.0,
            steering_rad: 0.0,
            yaw_rate_rps: 0.0,
            lat_accel_g: 0.0,
            long_accel_g: 0.0,
            vert_accel_g: -1.0,
            velocity_x_mps: 45.0,
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

    fn drive_lap(tracker: &mut LapTracker, lap: u32, t0: f64, lap_len_s: f64) -> Vec<LapEvent> {
        let mut events = Vec::new();
        let steps = 60;
        for i in 0..steps {
            let pct = i as f64 / steps as f64;
            let ts = t0 + pct * lap_len_s;
            events.extend(tracker.update(&sample(ts, lap, pct)));
        }
        events
    }

    #[test]
    fn three_sectors_per_lap() {
        let mut tracker = LapTracker::new(LapConfig::default());
        tracker.set_context("TrackA", "CarA");
        let mut events = drive_lap(&mut tracker, 1, 0.0, 90.0);
        // Crossing into lap 2 finalizes lap 1.
        events.extend(tracker.update(&sample(90.0, 2, 0.0)));

        let sectors: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LapEvent::SectorCompleted(_)))
            .collect();
        // Interior crossings produce 2 SectorCompleted events; the third
        // sector closes inside the LapRecord.
        assert_eq!(sectors.len(), 2);

        let lap: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                LapEvent::LapCompleted(l) => Some(l),
                _ => None,
            })
            .collect();
        assert_eq!(lap.len(), 1);
        assert_eq!(lap[0].sector_times_s.len(), 3);
        assert!(lap[0].lap_time_s > 0.0);
        assert!(lap[0].sector_times_s.iter().all(|t| *t > 0.0));
    }

    #[test]
    fn wrap_without_lap_increment_completes_lap() {
        let mut tracker = LapTracker::new(LapConfig::default());
        tracker.set_context("TrackA", "CarA");
        drive_lap(&mut tracker, 1, 0.0, 80.0);
        // 0.983 -> 0.001 wrap, lap counter frozen at 1.
        let events = tracker.update(&sample(80.0, 1, 0.001));
        let laps = events
            .iter()
            .filter(|e| matches!(e, LapEvent::LapCompleted(_)))
            .count();
        assert_eq!(laps, 1, "a wrap after a plausible lap time completes the lap");
    }

    #[test]
    fn early_wrap_is_not_a_lap() {
        let mut tracker = LapTracker::new(LapConfig::default());
        tracker.update(&sample(0.0, 1, 0.95));
        // Wrap after only 5 seconds: below min_lap_time_s.
        let events = tracker.update(&sample(5.0, 1, 0.01));
        assert!(events
            .iter()
            .all(|e| !matches!(e, LapEvent::LapCompleted(_))));
    }

    #[test]
    fn sim_lap_time_preferred_over_wall_clock() {
        let mut tracker = LapTracker::new(LapConfig::default());
        tracker.set_context("TrackA", "CarA");
        drive_lap(&mut tracker, 1, 0.0, 90.0);
        let mut boundary = sample(90.0, 2, 0.0);
        boundary.last_lap_time_s = Some(89.123);
        let events = tracker.update(&boundary);
        let lap = events
            .iter()
            .find_map(|e| match e {
                LapEvent::LapCompleted(l) => Some(l.clone()),
                _ => None,
            })
            .expect("lap completed");
        assert!((lap.lap_time_s - 89.123).abs() < 1e-9);
    }

    #[test]
    fn pit_lap_marked_invalid() {
        let mut tracker = LapTracker::new(LapConfig::default());
        tracker.set_context("TrackA", "CarA");
        let steps = 60;
        for i in 0..steps {
            let pct = i as f64 / steps as f64;
            let mut s = sample(pct * 90.0, 1, pct);
            s.on_pit_road = true;
            tracker.update(&s);
        }
        let events = tracker.update(&sample(90.0, 2, 0.0));
        let lap = events
            .iter()
            .find_map(|e| match e {
                LapEvent::LapCompleted(l) => Some(l.clone()),
                _ => None,
            })
            .expect("lap completed");
        assert!(!lap.is_valid, "a lap mostly on pit road is invalid");
    }
}
