//! Off-track excursion detection
//!
//! Watches track-surface transitions. A single on-track to off-track
//! transition at speed is classified by the inputs at the moment it
//! happened; a high share of off-track samples in the trailing window is a
//! track-limits pattern.

use super::{Detector, DetectorContext};
use orc_core::config::OffTrackConfig;
use orc_core::model::{PatternInsight, Situation, TelemetrySample, TrackSurface};

pub struct OffTrackDetector {
    config: OffTrackConfig,
    prev_surface: Option<TrackSurface>,
    last_excursion: f64,
    last_pattern: f64,
}

impl OffTrackDetector {
    pub fn new(config: OffTrackConfig) -> Self {
        Self {
            config,
            prev_surface: None,
            last_excursion: f64::NEG_INFINITY,
            last_pattern: f64::NEG_INFINITY,
        }
    }
}

impl Detector for OffTrackDetector {
    fn name(&self) -> &'static str {
        "offtrack"
    }

    fn scan(
        &mut self,
        snapshot: &[TelemetrySample],
        cx: &DetectorContext<'_>,
    ) -> Vec<PatternInsight> {
        let Some(sample) = snapshot.last() else {
            return Vec::new();
        };
        let now = sample.timestamp;
        let mut insights = Vec::new();

        let went_off = self.prev_surface == Some(TrackSurface::OnTrack)
            && sample.track_surface == TrackSurface::OffTrack;

        if went_off && sample.speed_mps > self.config.min_speed_mps && now - self.last_excursion > 5.0
        {
            self.last_excursion = now;
            let corner = cx.corner_name.unwrap_or("the corner");
            let (situation, description, improvement) = if sample.brake > self.config.braking_threshold
            {
                (
                    Situation::OffUnderBraking,
                    format!("Went off under braking at {corner} - brake earlier and smoother"),
                    0.2,
                )
            } else if sample.throttle > self.config.power_threshold {
                (
                    Situation::OffUnderPower,
                    format!("Went off on throttle at {corner} - ease into the power"),
                    0.15,
                )
            } else {
                (
                    Situation::OffMidcorner,
                    format!("Went off mid-corner at {corner} - smoother inputs and line"),
                    0.1,
                )
            };
            insights.push(PatternInsight {
                situation,
                confidence: 0.85,
                importance: 0.8,
                corner_id: cx.corner_id.map(str::to_string),
                description,
                reference: None,
                improvement_potential_s: improvement,
            });
        }

        // Repeated track-limit violations across the trailing window.
        let window = self.config.pattern_window;
        if snapshot.len() >= window && now - self.last_pattern > 20.0 {
            let tail = &snapshot[snapshot.len() - window..];
            let off = tail
                .iter()
                .filter(|s| s.track_surface == TrackSurface::OffTrack)
                .count();
            if off as f64 > window as f64 * self.config.pattern_ratio {
                self.last_pattern = now;
                insights.push(PatternInsight {
                    situation: Situation::TrackLimitsPattern,
                    confidence: 0.75,
                    importance: 0.6,
                    corner_id: None,
                    description: "Multiple track limit violations - prioritize consistency over speed"
                        .to_string(),
                    reference: None,
                    improvement_potential_s: 0.3,
                });
            }
        }

        self.prev_surface = Some(sample.track_surface);
        insights
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::SessionPhase;

    fn sample(ts: f64, surface: TrackSurface, speed: f64, brake: f64, throttle: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp: ts,
            lap: 1,
            lap_dist_pct: 0.3,
            speed_mps: speed,
            rpm: 5000.0,
            gear: 4,
            throttle,
            brake,
            steering_rad: 0.1,
            yaw_rate_rps: 0.05,
            lat_accel_g: 0.5,
            long_accel_g: -0.5,
            vert_accel_g: -1.0,
            velocity_x_mps: speed,
            velocity_y_mps: 0.0,
            tire_pressures_kpa: [170.0; 4],
            tire_temps_c: None,
            fuel_level_l: 30.0,
            fuel_use_per_hour_l: 25.0,
            on_pit_road: false,
            track_surface: surface,
            session_phase: SessionPhase::Racing,
            session_flags: 0,
            last_lap_time_s: None,
            current_lap_time_s: None,
            track_name: None,
            car_name: None,
        }
    }

    fn cx<'a>() -> DetectorContext<'a> {
        DetectorContext {
            corner_id: Some("t3"),
            corner_name: Some("Turn 3"),
            baseline_established: true,
        }
    }

    #[test]
    fn braking_excursion_classified() {
        let mut detector = OffTrackDetector::new(OffTrackConfig::default());
        // 120 km/h with 40% brake, throttle released.
        let on = sample(0.0, TrackSurface::OnTrack, 33.3, 0.4, 0.0);
        let off = sample(0.016, TrackSurface::OffTrack, 33.3, 0.4, 0.0);
        detector.scan(&[on.clone()], &cx());
        let insights = detector.scan(&[on, off], &cx());
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].situation, Situation::OffUnderBraking);
        assert!((insights[0].improvement_potential_s - 0.2).abs() < 1e-9);
        assert!(insights[0].importance >= 0.7);
    }

    #[test]
    fn power_excursion_classified() {
        let mut detector = OffTrackDetector::new(OffTrackConfig::default());
        let on = sample(0.0, TrackSurface::OnTrack, 30.0, 0.0, 0.8);
        let off = sample(0.016, TrackSurface::OffTrack, 30.0, 0.0, 0.8);
        detector.scan(&[on.clone()], &cx());
        let insights = detector.scan(&[on, off], &cx());
        assert_eq!(insights[0].situation, Situation::OffUnderPower);
    }

    #[test]
    fn slow_excursion_ignored() {
        let mut detector = OffTrackDetector::new(OffTrackConfig::default());
        let on = sample(0.0, TrackSurface::OnTrack, 2.0, 0.0, 0.0);
        let off = sample(0.016, TrackSurface::OffTrack, 2.0, 0.0, 0.0);
        detector.scan(&[on.clone()], &cx());
        assert!(detector.scan(&[on, off], &cx()).is_empty());
    }

    #[test]
    fn repeated_violations_flag_pattern() {
        let mut detector = OffTrackDetector::new(OffTrackConfig::default());
        let mut window = Vec::new();
        let mut found = false;
        for i in 0..40 {
            let surface = if i % 4 == 0 { TrackSurface::OffTrack } else { TrackSurface::OnTrack };
            window.push(sample(i as f64 / 60.0, surface, 30.0, 0.0, 0.5));
            let insights = detector.scan(&window, &cx());
            if insights.iter().any(|x| x.situation == Situation::TrackLimitsPattern) {
                found = true;
            }
        }
        assert!(found, "25% off-track samples should flag a track-limits pattern");
    }
}
