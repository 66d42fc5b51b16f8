//! Lap-time consistency analysis
//!
//! Runs on lap completion rather than on the sample stream: computes the
//! coefficient of variation over the recent valid laps and reports either
//! inconsistency or, when the spread stays well inside the threshold,
//! positive reinforcement.

use super::{mean, stddev};
use orc_core::config::ConsistencyConfig;
use orc_core::model::{PatternInsight, Situation};

pub struct ConsistencyDetector {
    config: ConsistencyConfig,
    /// Laps already praised, so the positive message fires once per streak.
    praised_at_lap: Option<usize>,
}

impl ConsistencyDetector {
    pub fn new(config: ConsistencyConfig) -> Self {
        Self { config, praised_at_lap: None }
    }

    /// `lap_times` are the session's valid lap times in completion order;
    /// `threshold` is the adaptive consistency threshold from the session
    /// state.
    pub fn on_lap(&mut self, lap_times: &[f64], threshold: f64) -> Vec<PatternInsight> {
        if lap_times.len() < 3 {
            return Vec::new();
        }
        let window = self.config.window_laps;
        let recent: Vec<f64> = lap_times.iter().rev().take(window).copied().collect();
        let m = mean(&recent);
        if m <= 0.0 {
            return Vec::new();
        }
        let ratio = stddev(&recent) / m;

        if ratio > threshold {
            self.praised_at_lap = None;
            return vec![PatternInsight {
                situation: Situation::InconsistentLapTimes,
                confidence: 0.9,
                importance: (2.0 * ratio).min(1.0),
                corner_id: None,
                description: format!(
                    "Lap times varying by {:.1}% - aim for repeatable marks every lap",
                    ratio * 100.0
                ),
                reference: None,
                improvement_potential_s: stddev(&recent),
            }];
        }

        if ratio < threshold / 2.0 && recent.len() >= 3 {
            // One praise per streak of consistent laps.
            if self.praised_at_lap.is_none() {
                self.praised_at_lap = Some(lap_times.len());
                return vec![PatternInsight {
                    situation: Situation::ExcellentConsistency,
                    confidence: 0.95,
                    importance: 0.3,
                    corner_id: None,
                    description: format!(
                        "Excellent consistency - lap times within {:.1}%",
                        ratio * 100.0
                    ),
                    reference: None,
                    improvement_potential_s: 0.0,
                }];
            }
        }

        Vec::new()
    }
}
