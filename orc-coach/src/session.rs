//! Session lifecycle and learning state
//!
//! A session is created lazily, once the track and car are known and the
//! car is actually moving. Until three valid laps exist the coaching
//! surface is limited to a baseline countdown; after that the full
//! detector suite is enabled, the consistency threshold is fitted to the
//! driver's natural variation, and the tracker keeps adapting style and
//! thresholds as laps accumulate.

use orc_core::config::SessionConfig;
use orc_core::model::{
    CornerStats, DrivingStyle, LapRecord, PatternInsight, SessionState, Situation,
    TelemetrySample,
};
use tracing::{debug, info};

/// What `on_lap_completed` observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LapOutcome {
    /// Lap recorded, baseline still pending.
    Counting,
    /// This lap established the baseline.
    BaselineEstablished,
    /// Normal post-baseline lap.
    Recorded,
    /// Lap was invalid and ignored for baseline purposes.
    Ignored,
}

pub struct SessionTracker {
    config: SessionConfig,
    state: Option<SessionState>,
    last_countdown: f64,
    last_positive: f64,
}

impl SessionTracker {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            state: None,
            last_countdown: f64::NEG_INFINITY,
            last_positive: f64::NEG_INFINITY,
        }
    }

    pub fn state(&self) -> Option<&SessionState> {
        self.state.as_ref()
    }

    pub fn state_mut(&mut self) -> Option<&mut SessionState> {
        self.state.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn baseline_established(&self) -> bool {
        self.state.as_ref().map(|s| s.baseline_established).unwrap_or(false)
    }

    /// Create the session once track and car are known and the car moves.
    /// Returns true when a session was created on this call.
    pub fn maybe_start(&mut self, sample: &TelemetrySample, now_epoch: f64) -> bool {
        if self.state.is_some() {
            return false;
        }
        let (Some(track), Some(car)) = (&sample.track_name, &sample.car_name) else {
            return false;
        };
        if track.is_empty() || car.is_empty() {
            return false;
        }
        if sample.speed_mps <= self.config.min_activity_speed_mps {
            return false;
        }

        let session_id = format!("{}_{}_{}", track, car, now_epoch as i64);
        info!(session = %session_id, "session started");
        self.state = Some(SessionState::new(
            session_id,
            track.clone(),
            car.clone(),
            now_epoch,
        ));
        true
    }

    /// Seed learned values from a persisted baseline for this (track, car).
    /// A previously established baseline skips the countdown entirely.
    pub fn apply_baseline(
        &mut self,
        baseline_established: bool,
        consistency_threshold: f64,
        shift_bands: std::collections::BTreeMap<i8, (f64, f64)>,
        corner_tables: std::collections::BTreeMap<String, CornerStats>,
        best_lap_time: Option<f64>,
    ) {
        let Some(state) = self.state.as_mut() else { return };
        state.baseline_established = baseline_established;
        if consistency_threshold > 0.0 {
            state.consistency_threshold = consistency_threshold;
        }
        if !shift_bands.is_empty() {
            state.shift_bands = shift_bands;
        }
        if !corner_tables.is_empty() {
            state.corner_tables = corner_tables;
        }
        state.best_lap_time_s = best_lap_time;
        if baseline_established {
            info!("baseline restored from persistence; full coaching enabled");
        }
    }

    /// Countdown message while the baseline is pending; suppressed when the
    /// car is not moving and rate-limited to avoid spam.
    pub fn baseline_countdown(&mut self, sample: &TelemetrySample) -> Option<PatternInsight> {
        let state = self.state.as_ref()?;
        if state.baseline_established {
            return None;
        }
        if sample.speed_mps < self.config.countdown_min_speed_mps {
            return None;
        }
        // Spaced well below the global delivery budget.
        if sample.timestamp - self.last_countdown < 20.0 {
            return None;
        }
        self.last_countdown = sample.timestamp;

        let completed = state.valid_lap_times().len();
        let remaining = self.config.baseline_laps.saturating_sub(completed);
        let description = match (completed, remaining) {
            (0, r) => format!("Complete {r} laps to establish your coaching baseline"),
            (_, 1) => "1 more lap to the coaching baseline - keep driving".to_string(),
            (c, r) => format!(
                "{r} more laps needed for the baseline ({c}/{} completed)",
                self.config.baseline_laps
            ),
        };
        Some(PatternInsight {
            situation: Situation::BaselineProgress,
            confidence: 1.0,
            importance: 0.3,
            corner_id: None,
            description,
            reference: None,
            improvement_potential_s: 0.0,
        })
    }

    /// Record a completed lap: best-lap bookkeeping, baseline
    /// establishment, style classification and adaptive thresholds.
    pub fn on_lap_completed(&mut self, lap: &LapRecord) -> LapOutcome {
        let baseline_laps = self.config.baseline_laps;
        let Some(state) = self.state.as_mut() else {
            return LapOutcome::Ignored;
        };

        state.laps.push(lap.clone());
        if !lap.is_valid || lap.lap_time_s <= 0.0 {
            return LapOutcome::Ignored;
        }

        if state.best_lap_time_s.map(|b| lap.lap_time_s < b).unwrap_or(true) {
            state.best_lap_time_s = Some(lap.lap_time_s);
            state.best_lap_number = Some(lap.lap_number);
            info!(time = lap.lap_time_s, lap = lap.lap_number, "new best lap this session");
        }

        let valid = state.valid_lap_times();

        let outcome = if !state.baseline_established && valid.len() >= baseline_laps {
            Self::establish_baseline(state, &valid);
            LapOutcome::BaselineEstablished
        } else if !state.baseline_established {
            LapOutcome::Counting
        } else {
            LapOutcome::Recorded
        };

        Self::classify_style(state, &valid);
        Self::adapt_thresholds(state, &valid);
        outcome
    }

    /// The baseline-established insight (one-shot, built by the caller on
    /// `LapOutcome::BaselineEstablished`).
    pub fn baseline_established_insight(&self) -> PatternInsight {
        PatternInsight {
            situation: Situation::BaselineEstablished,
            confidence: 1.0,
            importance: 0.8,
            corner_id: None,
            description: "Coaching baseline established - full analysis is now active".to_string(),
            reference: None,
            improvement_potential_s: 0.0,
        }
    }

    fn establish_baseline(state: &mut SessionState, valid: &[f64]) {
        state.baseline_established = true;
        let mean = valid.iter().sum::<f64>() / valid.len() as f64;
        let var = valid.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / valid.len() as f64;
        let cv = var.sqrt() / mean;
        // Fit the consistency threshold to the driver's natural variation.
        state.consistency_threshold = cv.clamp(0.02, 0.10);
        info!(
            avg = mean,
            threshold = state.consistency_threshold,
            "baseline established"
        );
    }

    fn classify_style(state: &mut SessionState, valid: &[f64]) {
        if valid.len() < 5 {
            return;
        }
        let recent: Vec<f64> = valid.iter().rev().take(5).copied().collect();
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let var = recent.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / recent.len() as f64;
        let cv = var.sqrt() / mean;

        let (style, intensity) = if cv < 0.01 {
            (DrivingStyle::Consistent, 0.7)
        } else if cv > 0.05 {
            (DrivingStyle::Developing, 1.2)
        } else {
            (DrivingStyle::Improving, 1.0)
        };
        state.driving_style = style;
        state.coaching_intensity = intensity;
        debug!(style = ?style, intensity, "driving style classified");
    }

    fn adapt_thresholds(state: &mut SessionState, valid: &[f64]) {
        if valid.len() < 10 {
            return;
        }
        let recent: Vec<f64> = valid.iter().rev().take(10).copied().collect();
        let half = recent.len() / 2;
        // `recent` is newest-first.
        let newer = &recent[..half];
        let older = &recent[half..];
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        let improvement = (mean(older) - mean(newer)) / mean(older);

        if improvement > 0.02 {
            state.consistency_threshold = (state.consistency_threshold * 0.95).max(0.01);
            debug!("driver improving; tightening the consistency standard");
        } else if improvement < -0.01 {
            state.consistency_threshold = (state.consistency_threshold * 1.05).min(0.15);
            debug!("pace regressing; relaxing the consistency standard");
        }
    }

    /// Record a braking event at a corner into the learned tables.
    pub fn track_corner_brake(&mut self, corner_id: &str, brake_point_pct: f64, entry_speed: f64) {
        let Some(state) = self.state.as_mut() else { return };
        let stats = state.corner_tables.entry(corner_id.to_string()).or_default();
        push_bounded(&mut stats.brake_points, brake_point_pct, 10);
        push_bounded(&mut stats.entry_speeds_mps, entry_speed, 10);
    }

    /// Record a corner exit; correlates the learned optimum with laps close
    /// to the best.
    pub fn track_corner_exit(&mut self, corner_id: &str, exit_speed: f64, lap_time_hint: f64) {
        let Some(state) = self.state.as_mut() else { return };
        let best = state.best_lap_time_s;
        let stats = state.corner_tables.entry(corner_id.to_string()).or_default();
        push_bounded(&mut stats.exit_speeds_mps, exit_speed, 10);
        push_bounded(&mut stats.lap_times_s, lap_time_hint, 10);

        // Re-estimate the optimum from traversals on competitive laps.
        if let Some(best) = best {
            let good: Vec<usize> = stats
                .lap_times_s
                .iter()
                .enumerate()
                .filter(|(_, t)| **t > 0.0 && **t <= best * 1.02)
                .map(|(i, _)| i)
                .collect();
            if good.len() >= 3 {
                let avg = |values: &[f64]| -> Option<f64> {
                    let picked: Vec<f64> =
                        good.iter().filter_map(|i| values.get(*i).copied()).collect();
                    (!picked.is_empty())
                        .then(|| picked.iter().sum::<f64>() / picked.len() as f64)
                };
                stats.best_brake_point = avg(&stats.brake_points);
                stats.best_entry_speed_mps = avg(&stats.entry_speeds_mps);
            }
        }
    }

    /// Brake-point advice from the learned corner table: compares the
    /// recent tendency at a corner against the brake point correlated with
    /// the best laps.
    pub fn corner_brake_advice(&mut self, corner_id: &str, corner_name: &str) -> Option<PatternInsight> {
        let state = self.state.as_ref()?;
        if !state.baseline_established {
            return None;
        }
        let stats = state.corner_tables.get(corner_id)?;
        let best = stats.best_brake_point?;
        if stats.brake_points.len() < 3 {
            return None;
        }
        let recent: Vec<f64> = stats.brake_points.iter().rev().take(3).copied().collect();
        let tendency = recent.iter().sum::<f64>() / recent.len() as f64;
        let difference = tendency - best;
        if difference.abs() <= 0.015 {
            return None;
        }

        let (situation, description) = if difference > 0.0 {
            (
                Situation::LateBraking,
                format!(
                    "Brake earlier into {corner_name} - about {:.1}% of a lap sooner",
                    difference * 100.0
                ),
            )
        } else {
            (
                Situation::TechniqueImprovement,
                format!(
                    "You can brake later into {corner_name} - try {:.1}% deeper",
                    difference.abs() * 100.0
                ),
            )
        };
        Some(PatternInsight {
            situation,
            confidence: 0.85,
            importance: 0.75,
            corner_id: Some(corner_id.to_string()),
            description,
            reference: None,
            improvement_potential_s: 0.1,
        })
    }

    /// Positive reinforcement for a new best speed carried through a
    /// corner; rate-limited.
    pub fn corner_personal_best(
        &mut self,
        corner_id: &str,
        corner_name: &str,
        speed_mps: f64,
        now: f64,
    ) -> Option<PatternInsight> {
        let positive_cooldown = self.config.positive_cooldown_s;
        let state = self.state.as_mut()?;
        if !state.baseline_established || speed_mps < 15.0 {
            return None;
        }
        let stats = state.corner_tables.entry(corner_id.to_string()).or_default();
        let improved = stats.best_corner_speed_mps.map(|b| speed_mps > b).unwrap_or(true);
        let had_previous = stats.best_corner_speed_mps.is_some();
        if improved {
            stats.best_corner_speed_mps = Some(speed_mps);
        }
        if !improved || !had_previous {
            return None;
        }
        if now - self.last_positive < positive_cooldown {
            return None;
        }
        self.last_positive = now;
        Some(PatternInsight {
            situation: Situation::PersonalBestCorner,
            confidence: 0.95,
            importance: 0.35,
            corner_id: Some(corner_id.to_string()),
            description: format!("Personal best speed through {corner_name} - great technique"),
            reference: None,
            improvement_potential_s: 0.0,
        })
    }

    /// Close the session and hand back the final state for persistence.
    pub fn close(&mut self, now_epoch: f64) -> Option<SessionState> {
        let mut state = self.state.take()?;
        state.end_time = Some(now_epoch);
        info!(session = %state.session_id, laps = state.laps.len(), "session closed");
        Some(state)
    }
}

fn push_bounded(values: &mut Vec<f64>, value: f64, cap: usize) {
    values.push(value);
    if values.len() > cap {
        let excess = values.len() - cap;
        values.drain(..excess);
    }
}
