//! Coaching configuration
//!
//! One frozen `CoachConfig` is built at startup (defaults, optionally
//! overridden by a JSON file) and passed to components at construction.
//! There is no mutable global configuration; adaptive values (consistency
//! threshold, shift bands) live in the session state instead.

use crate::error::CoachError;
use crate::model::MessageCategory;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Telemetry buffer sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Ring window in seconds.
    pub window_s: f64,
    /// Expected sample rate in Hz.
    pub rate_hz: f64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { window_s: 30.0, rate_hz: 60.0 }
    }
}

impl BufferConfig {
    pub fn capacity(&self) -> usize {
        (self.window_s * self.rate_hz).round() as usize
    }
}

/// Lap and sector detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LapConfig {
    /// Sorted interior sector boundaries; [0, .., 1] implied at the ends.
    pub sector_boundaries: Vec<f64>,
    /// A wrap-based lap boundary needs at least this much elapsed time.
    pub min_lap_time_s: f64,
    /// Lap-distance decrease treated as a wrap.
    pub wrap_threshold: f64,
}

impl Default for LapConfig {
    fn default() -> Self {
        Self {
            sector_boundaries: vec![0.0, 0.33, 0.66, 1.0],
            min_lap_time_s: 30.0,
            wrap_threshold: 0.5,
        }
    }
}

/// Handling (understeer/oversteer) detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlingConfig {
    /// Yaw-response calibration constant K.
    pub yaw_calibration: f64,
    /// Yaw ratio above this is oversteer.
    pub oversteer_ratio: f64,
    /// Yaw ratio below this is understeer.
    pub understeer_ratio: f64,
    /// Minimum speed for the analysis to be meaningful, m/s.
    pub min_speed_mps: f64,
    /// Minimum steering magnitude, radians.
    pub min_steering_rad: f64,
    /// Per-(corner, direction) cooldown, seconds.
    pub event_cooldown_s: f64,
    /// Rolling per-corner event cap.
    pub max_events_per_corner: usize,
    /// Averaging window, seconds.
    pub window_s: f64,
}

impl Default for HandlingConfig {
    fn default() -> Self {
        Self {
            yaw_calibration: 0.5,
            oversteer_ratio: 1.3,
            understeer_ratio: 0.7,
            min_speed_mps: 15.0,
            min_steering_rad: 0.1,
            event_cooldown_s: 15.0,
            max_events_per_corner: 10,
            window_s: 0.3,
        }
    }
}

/// Braking detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrakingConfig {
    /// Brake fraction treated as application/release threshold.
    pub apply_threshold: f64,
    /// Average peak pressure below this is insufficient braking.
    pub insufficient_peak: f64,
    /// Speed above which a sudden application is a late-braking candidate, m/s.
    pub late_brake_speed_mps: f64,
    /// Input-overlap is a mistake below this speed, m/s (~50 mph).
    pub overlap_mistake_speed_mps: f64,
    /// Overlap is trail braking above this speed, m/s (~80 mph).
    pub trail_brake_speed_mps: f64,
    /// Minimum braking events before the aggregate check fires.
    pub min_events: usize,
}

impl Default for BrakingConfig {
    fn default() -> Self {
        Self {
            apply_threshold: 0.10,
            insufficient_peak: 0.50,
            late_brake_speed_mps: 40.2,
            overlap_mistake_speed_mps: 22.4,
            trail_brake_speed_mps: 35.8,
            min_events: 2,
        }
    }
}

/// Shift detector and band learning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    /// RPM deviation from the band centre that triggers advice.
    pub band_deviation_rpm: f64,
    /// Target RPM rise on a rev-matched downshift.
    pub rev_match_target_rpm: f64,
    /// Rev-match quality below this is poor (0-100 scale).
    pub poor_rev_match_quality: f64,
    /// Upshifts needed from a gear before its band is re-learned.
    pub min_shifts_to_learn: usize,
    /// Laps within this fraction of the personal best count as good.
    pub good_lap_tolerance: f64,
    /// Blend weight kept from the old band when learning.
    pub band_blend_keep: f64,
    /// Sustained seconds before a gear advisory fires.
    pub advisory_hold_s: f64,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            band_deviation_rpm: 500.0,
            rev_match_target_rpm: 1000.0,
            poor_rev_match_quality: 60.0,
            min_shifts_to_learn: 5,
            good_lap_tolerance: 0.02,
            band_blend_keep: 0.7,
            advisory_hold_s: 2.0,
        }
    }
}

/// Weight-transfer and g-force detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    /// Lateral grip limit, g.
    pub max_lat_g: f64,
    /// Longitudinal grip limit, g.
    pub max_long_g: f64,
    /// Combined g above this raises a warning.
    pub high_g_warning: f64,
    /// Smoothness below this is rough.
    pub rough_smoothness: f64,
    /// Average grip-circle utilization below this for the hold period is
    /// underused grip.
    pub underused_grip: f64,
    pub underused_hold_s: f64,
    /// History window, seconds.
    pub window_s: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            max_lat_g: 2.5,
            max_long_g: 2.0,
            high_g_warning: 2.5,
            rough_smoothness: 0.6,
            underused_grip: 0.5,
            underused_hold_s: 5.0,
            window_s: 5.0,
        }
    }
}

/// Consistency detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsistencyConfig {
    /// Starting std/mean threshold; becomes adaptive after baseline.
    pub threshold: f64,
    /// Laps considered in the rolling window.
    pub window_laps: usize,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self { threshold: 0.05, window_laps: 5 }
    }
}

/// Off-track detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OffTrackConfig {
    /// Minimum speed for an excursion to count, m/s.
    pub min_speed_mps: f64,
    /// Brake fraction classifying an excursion as under braking.
    pub braking_threshold: f64,
    /// Throttle fraction classifying an excursion as under power.
    pub power_threshold: f64,
    /// Off-track share of the trailing samples that flags a pattern.
    pub pattern_ratio: f64,
    /// Trailing sample count for the pattern check.
    pub pattern_window: usize,
}

impl Default for OffTrackConfig {
    fn default() -> Self {
        Self {
            min_speed_mps: 4.0,
            braking_threshold: 0.30,
            power_threshold: 0.50,
            pattern_ratio: 0.20,
            pattern_window: 30,
        }
    }
}

/// Corner micro-analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroConfig {
    /// Steering magnitude that opens a corner, radians.
    pub entry_steering_rad: f64,
    /// Steering magnitude that closes a corner, radians.
    pub exit_steering_rad: f64,
    /// Minimum buffered samples before a corner can close.
    pub min_samples: usize,
    /// Seconds represented by one full lap fraction when converting
    /// position deltas to time deltas. Empirical; per-track calibration is
    /// a config change.
    pub fraction_to_seconds: f64,
    /// Pedal fraction treated as application when finding key points.
    pub input_threshold: f64,
}

impl Default for MicroConfig {
    fn default() -> Self {
        Self {
            entry_steering_rad: 0.1,
            exit_steering_rad: 0.05,
            min_samples: 5,
            fraction_to_seconds: 2.0,
            input_threshold: 0.10,
        }
    }
}

/// Mistake tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MistakeConfig {
    /// Analyses losing less than this are not mistakes, seconds.
    pub min_time_loss_s: f64,
    /// Recent-frequency window, seconds.
    pub recent_window_s: f64,
}

impl Default for MistakeConfig {
    fn default() -> Self {
        Self { min_time_loss_s: 0.05, recent_window_s: 600.0 }
    }
}

/// Message queue behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Non-critical deliveries allowed per minute.
    pub global_rate_limit: usize,
    /// Remote-over-local override and combination window, seconds.
    pub combination_window_s: f64,
    /// Keyword matches required for combination.
    pub min_keyword_matches: usize,
    /// Messages merged into one combined message at most.
    pub max_combined: usize,
    /// Word-overlap ratio above which two messages are duplicates.
    pub similarity_threshold: f64,
    /// Fallback category cooldown, seconds.
    pub default_cooldown_s: f64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            global_rate_limit: 5,
            combination_window_s: 3.0,
            min_keyword_matches: 2,
            max_combined: 5,
            similarity_threshold: 0.6,
            default_cooldown_s: 10.0,
        }
    }
}

impl QueueConfig {
    /// Per-category delivery cooldown, seconds.
    pub fn cooldown_for(&self, category: MessageCategory) -> f64 {
        match category {
            MessageCategory::Braking => 8.0,
            MessageCategory::Cornering => 12.0,
            MessageCategory::Throttle => 6.0,
            MessageCategory::RacingLine => 15.0,
            _ => self.default_cooldown_s,
        }
    }
}

/// Remote LLM enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    /// Endpoint of an OpenAI-compatible chat completion API.
    pub base_url: String,
    pub model: String,
    /// Requests allowed per minute.
    pub rate_limit_per_min: usize,
    /// Text request timeout, seconds.
    pub text_timeout_s: f64,
    /// Timeout when audio generation is requested, seconds.
    pub audio_timeout_s: f64,
    pub max_tokens: u32,
    pub temperature: f64,
    /// Confidence floor applied to enriched messages.
    pub confidence_floor: f64,
    /// Local confidence below which the decider may escalate.
    pub escalate_below_confidence: f64,
    /// Importance above which the decider may escalate.
    pub escalate_above_importance: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            rate_limit_per_min: 5,
            text_timeout_s: 10.0,
            audio_timeout_s: 15.0,
            max_tokens: 150,
            temperature: 0.7,
            confidence_floor: 0.8,
            escalate_below_confidence: 0.6,
            escalate_above_importance: 0.7,
        }
    }
}

/// Session lifecycle and baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Valid laps required before the baseline is established.
    pub baseline_laps: usize,
    /// Car must move faster than this before a session is created, m/s
    /// (~5 mph).
    pub min_activity_speed_mps: f64,
    /// Countdown messages are suppressed below this speed, m/s.
    pub countdown_min_speed_mps: f64,
    /// Positive feedback cooldown, seconds.
    pub positive_cooldown_s: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baseline_laps: 3,
            min_activity_speed_mps: 2.24,
            countdown_min_speed_mps: 4.5,
            positive_cooldown_s: 15.0,
        }
    }
}

/// Reference lap qualification rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// A lap within this fraction of the personal best is `optimal`.
    pub optimal_tolerance: f64,
    /// Variation across the window below this creates a `consistency` lap.
    pub consistency_variation: f64,
    /// A lap within this fraction of the personal best is `race_pace`.
    pub race_pace_tolerance: f64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            optimal_tolerance: 0.005,
            consistency_variation: 0.01,
            race_pace_tolerance: 0.02,
        }
    }
}

/// The frozen top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoachConfig {
    pub buffer: BufferConfig,
    pub laps: LapConfig,
    pub handling: HandlingConfig,
    pub braking: BrakingConfig,
    pub shift: ShiftConfig,
    pub dynamics: DynamicsConfig,
    pub consistency: ConsistencyConfig,
    pub off_track: OffTrackConfig,
    pub micro: MicroConfig,
    pub mistakes: MistakeConfig,
    pub queue: QueueConfig,
    pub llm: LlmConfig,
    pub session: SessionConfig,
    pub reference: ReferenceConfig,
    /// Persistence root. When unset, resolves under the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl CoachConfig {
    /// Load from a JSON file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, CoachError> {
        let config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    CoachError::Config(format!("cannot read {}: {e}", p.display()))
                })?;
                serde_json::from_str(&text)
                    .map_err(|e| CoachError::Config(format!("invalid config: {e}")))?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation of cross-field invariants.
    pub fn validate(&self) -> Result<(), CoachError> {
        if self.buffer.window_s <= 0.0 || self.buffer.rate_hz <= 0.0 {
            return Err(CoachError::Config("buffer window and rate must be positive".into()));
        }
        let b = &self.laps.sector_boundaries;
        if b.len() < 2 || b.first() != Some(&0.0) || b.last() != Some(&1.0) {
            return Err(CoachError::Config(
                "sector boundaries must start at 0.0 and end at 1.0".into(),
            ));
        }
        if b.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CoachError::Config("sector boundaries must be strictly increasing".into()));
        }
        if self.handling.understeer_ratio >= self.handling.oversteer_ratio {
            return Err(CoachError::Config(
                "understeer ratio must be below oversteer ratio".into(),
            ));
        }
        if self.queue.global_rate_limit == 0 {
            return Err(CoachError::Config("global rate limit must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.queue.similarity_threshold) {
            return Err(CoachError::Config("similarity threshold must be in [0, 1]".into()));
        }
        Ok(())
    }

    /// Resolved persistence directory (spec default `coaching_data/`).
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_local_dir()
            .map(|d| d.join("openracecoach").join("coaching_data"))
            .unwrap_or_else(|| PathBuf::from("coaching_data"))
    }

    /// Number of sectors implied by the boundaries.
    pub fn sector_count(&self) -> usize {
        self.laps.sector_boundaries.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        CoachConfig::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn bad_sector_boundaries_rejected() {
        let mut cfg = CoachConfig::default();
        cfg.laps.sector_boundaries = vec![0.0, 0.7, 0.4, 1.0];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn category_cooldowns_match_table() {
        let q = QueueConfig::default();
        assert_eq!(q.cooldown_for(MessageCategory::Braking), 8.0);
        assert_eq!(q.cooldown_for(MessageCategory::Cornering), 12.0);
        assert_eq!(q.cooldown_for(MessageCategory::Throttle), 6.0);
        assert_eq!(q.cooldown_for(MessageCategory::RacingLine), 15.0);
        assert_eq!(q.cooldown_for(MessageCategory::Handling), 10.0);
    }
}
