//! Reference lap management
//!
//! Keeps the benchmark laps for the current (track, car) pair keyed by
//! type, derives per-segment reference data from completed laps, owns the
//! per-corner references the micro-analyzer compares against, and answers
//! delta queries for the insight pipeline.

use orc_core::config::ReferenceConfig;
use orc_core::model::{
    CornerReference, LapRecord, OptimalInputs, ReferenceContext, ReferenceKind, ReferenceLap,
    ReferenceSegment, TelemetrySample, TrackSegment,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub struct ReferenceManager {
    config: ReferenceConfig,
    track_name: String,
    car_name: String,
    laps: BTreeMap<ReferenceKind, ReferenceLap>,
    corners: BTreeMap<String, CornerReference>,
    /// Personal best per sector, seconds.
    sector_bests: [f64; 3],
}

impl ReferenceManager {
    pub fn new(config: ReferenceConfig, track_name: String, car_name: String) -> Self {
        Self {
            config,
            track_name,
            car_name,
            laps: BTreeMap::new(),
            corners: BTreeMap::new(),
            sector_bests: [f64::INFINITY; 3],
        }
    }

    /// Seed from persisted data at session start (read-through).
    pub fn load(
        &mut self,
        laps: BTreeMap<ReferenceKind, ReferenceLap>,
        corners: Vec<CornerReference>,
    ) {
        // Session-best references never survive a reload.
        self.laps = laps;
        self.laps.remove(&ReferenceKind::SessionBest);
        for corner in corners {
            if corner.track_name == self.track_name && corner.car_name == self.car_name {
                self.corners.insert(corner.corner_id.clone(), corner);
            }
        }
        info!(
            track = %self.track_name,
            car = %self.car_name,
            references = self.laps.len(),
            corners = self.corners.len(),
            "loaded reference data"
        );
    }

    pub fn track_name(&self) -> &str {
        &self.track_name
    }

    pub fn car_name(&self) -> &str {
        &self.car_name
    }

    pub fn reference(&self, kind: ReferenceKind) -> Option<&ReferenceLap> {
        self.laps.get(&kind)
    }

    pub fn personal_best_time(&self) -> Option<f64> {
        self.laps.get(&ReferenceKind::PersonalBest).map(|l| l.lap_time_s)
    }

    pub fn sector_bests(&self) -> &[f64; 3] {
        &self.sector_bests
    }

    pub fn corner_reference(&self, corner_id: &str) -> Option<&CornerReference> {
        self.corners.get(corner_id)
    }

    pub fn add_corner_reference(&mut self, reference: CornerReference) {
        debug!(corner = %reference.corner_id, "corner reference added");
        self.corners.insert(reference.corner_id.clone(), reference);
    }

    pub fn corner_references(&self) -> Vec<CornerReference> {
        self.corners.values().cloned().collect()
    }

    pub fn available_kinds(&self) -> Vec<ReferenceKind> {
        self.laps.keys().copied().collect()
    }

    /// Apply a completed valid lap. Returns the reference kinds that were
    /// created or replaced; the caller persists the durable ones
    /// write-through.
    pub fn on_lap_completed(
        &mut self,
        lap: &LapRecord,
        segments: &[TrackSegment],
        recent_valid_times: &[f64],
        now_epoch: f64,
    ) -> Vec<ReferenceKind> {
        let mut updated = Vec::new();
        if !lap.is_valid || lap.lap_time_s <= 0.0 {
            return updated;
        }

        for (i, time) in lap.sector_times_s.iter().take(3).enumerate() {
            if *time > 0.0 && *time < self.sector_bests[i] {
                self.sector_bests[i] = *time;
            }
        }

        let personal_best = self.personal_best_time();

        // Personal best: strictly faster than the stored one.
        if personal_best.map(|pb| lap.lap_time_s < pb).unwrap_or(true) {
            let reference = self.build_reference(lap, ReferenceKind::PersonalBest, segments, now_epoch);
            info!(time = lap.lap_time_s, "new personal best");
            self.laps.insert(ReferenceKind::PersonalBest, reference);
            updated.push(ReferenceKind::PersonalBest);
        }

        // Session best: in-memory only.
        let session_best = self.laps.get(&ReferenceKind::SessionBest).map(|l| l.lap_time_s);
        if session_best.map(|sb| lap.lap_time_s < sb).unwrap_or(true) {
            let reference = self.build_reference(lap, ReferenceKind::SessionBest, segments, now_epoch);
            self.laps.insert(ReferenceKind::SessionBest, reference);
            updated.push(ReferenceKind::SessionBest);
        }

        // Qualification-based kinds, all relative to the (possibly new)
        // personal best.
        if let Some(pb) = self.personal_best_time() {
            if lap.lap_time_s <= pb * (1.0 + self.config.optimal_tolerance) {
                let reference = self.build_reference(lap, ReferenceKind::Optimal, segments, now_epoch);
                self.laps.insert(ReferenceKind::Optimal, reference);
                updated.push(ReferenceKind::Optimal);
            }
            if lap.lap_time_s <= pb * (1.0 + self.config.race_pace_tolerance) {
                let reference = self.build_reference(lap, ReferenceKind::RacePace, segments, now_epoch);
                self.laps.insert(ReferenceKind::RacePace, reference);
                updated.push(ReferenceKind::RacePace);
            }
        }

        if recent_valid_times.len() >= 5 {
            let tail: Vec<f64> = recent_valid_times.iter().rev().take(5).copied().collect();
            let mean = tail.iter().sum::<f64>() / tail.len() as f64;
            let var = tail.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / tail.len() as f64;
            let cv = var.sqrt() / mean;
            if cv < self.config.consistency_variation {
                let reference =
                    self.build_reference(lap, ReferenceKind::Consistency, segments, now_epoch);
                self.laps.insert(ReferenceKind::Consistency, reference);
                updated.push(ReferenceKind::Consistency);
            }
        }

        updated
    }

    fn build_reference(
        &self,
        lap: &LapRecord,
        kind: ReferenceKind,
        segments: &[TrackSegment],
        now_epoch: f64,
    ) -> ReferenceLap {
        ReferenceLap {
            track_name: self.track_name.clone(),
            car_name: self.car_name.clone(),
            lap_time_s: lap.lap_time_s,
            kind,
            created_at: now_epoch,
            segments: derive_segments(lap, segments),
            sample_count: lap.samples.len(),
        }
    }

    /// Current delta against the preferred available reference, estimated
    /// proportionally from lap-distance. Positive = slower.
    pub fn reference_context(
        &self,
        lap_dist_pct: f64,
        current_lap_time_s: Option<f64>,
    ) -> Option<ReferenceContext> {
        let current = current_lap_time_s?;
        if lap_dist_pct <= 0.02 {
            return None;
        }
        for kind in [
            ReferenceKind::PersonalBest,
            ReferenceKind::Engineer,
            ReferenceKind::SessionBest,
        ] {
            if let Some(reference) = self.laps.get(&kind) {
                let expected = reference.lap_time_s * lap_dist_pct;
                let delta = current - expected;
                return Some(ReferenceContext {
                    kind,
                    delta_s: delta,
                    improvement_potential_s: delta.max(0.0),
                });
            }
        }
        None
    }

    /// Snapshot of the durable reference laps for persistence.
    pub fn durable_laps(&self) -> BTreeMap<ReferenceKind, ReferenceLap> {
        self.laps
            .iter()
            .filter(|(kind, _)| **kind != ReferenceKind::SessionBest)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

/// Slice a lap's telemetry into the given segments and summarize each
/// slice. Deterministic: the same lap and boundaries produce identical
/// numbers.
pub fn derive_segments(
    lap: &LapRecord,
    segments: &[TrackSegment],
) -> BTreeMap<String, ReferenceSegment> {
    let mut out = BTreeMap::new();

    for segment in segments {
        let slice: Vec<&TelemetrySample> = lap
            .samples
            .iter()
            .filter(|s| segment.start_pct <= s.lap_dist_pct && s.lap_dist_pct < segment.end_pct)
            .collect();
        if slice.is_empty() {
            continue;
        }

        let speeds: Vec<f64> = slice.iter().map(|s| s.speed_mps).collect();
        let throttles: Vec<f64> = slice.iter().map(|s| s.throttle).collect();
        let brakes: Vec<f64> = slice.iter().map(|s| s.brake).collect();
        let steering: Vec<f64> = slice.iter().map(|s| s.steering_rad.abs()).collect();

        let min_speed = speeds.iter().copied().fold(f64::INFINITY, f64::min);
        let max_speed = speeds.iter().copied().fold(0.0_f64, f64::max);
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;

        out.insert(
            segment.id.clone(),
            ReferenceSegment {
                segment_id: segment.id.clone(),
                segment_name: segment.name.clone(),
                start_pct: segment.start_pct,
                end_pct: segment.end_pct,
                segment_time_s: slice.len() as f64 / 60.0,
                entry_speed_mps: speeds[0],
                exit_speed_mps: *speeds.last().unwrap_or(&0.0),
                min_speed_mps: if min_speed.is_finite() { min_speed } else { 0.0 },
                max_speed_mps: max_speed,
                avg_throttle: mean(&throttles),
                avg_brake: mean(&brakes),
                max_steering_rad: steering.iter().copied().fold(0.0, f64::max),
                racing_line_score: racing_line_score(&slice),
                optimal_inputs: OptimalInputs {
                    entry_speed_mps: max_speed,
                    exit_speed_mps: max_speed,
                    throttle_application: throttles.iter().copied().fold(0.0, f64::max),
                    brake_release: brakes.iter().copied().fold(f64::INFINITY, f64::min),
                },
            },
        );
    }

    out
}

/// Input smoothness score in [0, 1]; lower steering/throttle change
/// variance scores higher.
fn racing_line_score(slice: &[&TelemetrySample]) -> f64 {
    if slice.len() < 3 {
        return 0.5;
    }
    let mut steering_changes = Vec::with_capacity(slice.len() - 1);
    let mut throttle_changes = Vec::with_capacity(slice.len() - 1);
    for pair in slice.windows(2) {
        steering_changes.push((pair[1].steering_rad - pair[0].steering_rad).abs());
        throttle_changes.push((pair[1].throttle - pair[0].throttle).abs());
    }
    let var = |v: &[f64]| -> f64 {
        let m = v.iter().sum::<f64>() / v.len() as f64;
        v.iter().map(|x| (x - m).powi(2)).sum::<f64>() / v.len() as f64
    };
    let score = 1.0 / (1.0 + var(&steering_changes) + var(&throttle_changes));
    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::{LapMetadata, SegmentKind, SessionPhase, TrackSurface};

    fn sample(pct: f64, speed: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: pct * 90.0,
            lap: 1,
            lap_dist_pct: pct,
            speed_mps: speed,
            rpm: 5000.0,
            gear: 4,
            throttle: 0.6,
            brake: 0.1,
            steering_rad: 0.05,
            yaw_rate_rps: 0.02,
            lat_accel_g: 0.2,
            long_accel_g: 0.0,
            vert_accel_g: -1.0,
            velocity_x_mps: speed,
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

    fn lap(number: u32, time: f64) -> LapRecord {
        let samples: Vec<TelemetrySample> =
            (0..90).map(|i| sample(i as f64 / 90.0, 40.0 + (i % 10) as f64)).collect();
        LapRecord {
            lap_number: number,
            lap_time_s: time,
            sector_times_s: vec![time * 0.33, time * 0.34, time * 0.33],
            metadata: LapMetadata {
                sector_boundaries: vec![0.0, 0.33, 0.66, 1.0],
                sample_count: samples.len(),
            },
            samples,
            track_name: "TrackA".to_string(),
            car_name: "CarA".to_string(),
            completed_at: 1000.0,
            is_valid: true,
        }
    }

    fn segments() -> Vec<TrackSegment> {
        vec![
            TrackSegment {
                id: "s1".into(),
                name: "Sector 1".into(),
                kind: SegmentKind::Straight,
                start_pct: 0.0,
                end_pct: 0.5,
                description: String::new(),
            },
            TrackSegment {
                id: "s2".into(),
                name: "Sector 2".into(),
                kind: SegmentKind::Corner,
                start_pct: 0.5,
                end_pct: 1.0,
                description: String::new(),
            },
        ]
    }

    fn manager() -> ReferenceManager {
        ReferenceManager::new(ReferenceConfig::default(), "TrackA".into(), "CarA".into())
    }

    #[test]
    fn first_valid_lap_becomes_personal_best() {
        let mut m = manager();
        let updated = m.on_lap_completed(&lap(1, 92.0), &segments(), &[92.0], 1000.0);
        assert!(updated.contains(&ReferenceKind::PersonalBest));
        assert_eq!(m.personal_best_time(), Some(92.0));
    }

    #[test]
    fn personal_best_only_improves_strictly() {
        let mut m = manager();
        m.on_lap_completed(&lap(1, 92.0), &segments(), &[92.0], 1000.0);
        let updated = m.on_lap_completed(&lap(2, 92.0), &segments(), &[92.0, 92.0], 1001.0);
        assert!(!updated.contains(&ReferenceKind::PersonalBest), "equal lap must not replace");
        let updated = m.on_lap_completed(&lap(3, 91.5), &segments(), &[92.0, 92.0, 91.5], 1002.0);
        assert!(updated.contains(&ReferenceKind::PersonalBest));
        assert_eq!(m.personal_best_time(), Some(91.5));
    }

    #[test]
    fn qualification_kinds_created() {
        let mut m = manager();
        m.on_lap_completed(&lap(1, 90.0), &segments(), &[90.0], 1000.0);
        // Within 0.5%: optimal and race_pace.
        let updated = m.on_lap_completed(&lap(2, 90.3), &segments(), &[90.0, 90.3], 1001.0);
        assert!(updated.contains(&ReferenceKind::Optimal));
        assert!(updated.contains(&ReferenceKind::RacePace));
        // 1.5% off: race pace only.
        let updated = m.on_lap_completed(&lap(3, 91.3), &segments(), &[90.0, 90.3, 91.3], 1002.0);
        assert!(!updated.contains(&ReferenceKind::Optimal));
        assert!(updated.contains(&ReferenceKind::RacePace));
    }

    #[test]
    fn consistency_reference_needs_tight_window() {
        let mut m = manager();
        let times = [90.0, 90.2, 90.1, 90.15, 90.05];
        for (i, t) in times.iter().enumerate() {
            m.on_lap_completed(&lap(i as u32 + 1, *t), &segments(), &times[..=i], 1000.0 + i as f64);
        }
        assert!(m.reference(ReferenceKind::Consistency).is_some());
    }

    #[test]
    fn invalid_lap_ignored() {
        let mut m = manager();
        let mut bad = lap(1, 89.0);
        bad.is_valid = false;
        assert!(m.on_lap_completed(&bad, &segments(), &[], 1000.0).is_empty());
        assert!(m.personal_best_time().is_none());
    }

    #[test]
    fn derived_segments_are_deterministic() {
        let lap = lap(1, 90.0);
        let a = derive_segments(&lap, &segments());
        let b = derive_segments(&lap, &segments());
        assert_eq!(a.len(), 2);
        for (key, seg_a) in &a {
            let seg_b = &b[key];
            assert_eq!(seg_a.entry_speed_mps, seg_b.entry_speed_mps);
            assert_eq!(seg_a.racing_line_score, seg_b.racing_line_score);
            assert_eq!(seg_a.segment_time_s, seg_b.segment_time_s);
        }
    }

    #[test]
    fn session_best_not_durable() {
        let mut m = manager();
        m.on_lap_completed(&lap(1, 92.0), &segments(), &[92.0], 1000.0);
        assert!(m.reference(ReferenceKind::SessionBest).is_some());
        assert!(!m.durable_laps().contains_key(&ReferenceKind::SessionBest));
        assert!(m.durable_laps().contains_key(&ReferenceKind::PersonalBest));
    }

    #[test]
    fn reference_context_prefers_personal_best() {
        let mut m = manager();
        m.on_lap_completed(&lap(1, 90.0), &segments(), &[90.0], 1000.0);
        let cx = m.reference_context(0.5, Some(46.5)).expect("context");
        assert_eq!(cx.kind, ReferenceKind::PersonalBest);
        // Expected elapsed at half distance: 45.0; we are 1.5 s behind.
        assert!((cx.delta_s - 1.5).abs() < 1e-9);
        assert!((cx.improvement_potential_s - 1.5).abs() < 1e-9);
    }
}
