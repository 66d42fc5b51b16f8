//! Weight transfer and g-force analysis
//!
//! Keeps a short history of lateral/longitudinal acceleration and derives
//! front-axle load, combined g, grip-circle utilization and input
//! smoothness. Raises warnings for excessive g, rough transitions, and
//! sustained under-use of the available grip.

use super::{mean, variance, Detector, DetectorContext};
use orc_core::config::DynamicsConfig;
use orc_core::model::{PatternInsight, Situation, TelemetrySample};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct DynamicsPoint {
    timestamp: f64,
    combined_g: f64,
    grip_circle: f64,
}

pub struct DynamicsDetector {
    config: DynamicsConfig,
    history: VecDeque<DynamicsPoint>,
    low_grip_since: Option<f64>,
    last_high_g: f64,
    last_rough: f64,
    last_underused: f64,
}

impl DynamicsDetector {
    pub fn new(config: DynamicsConfig) -> Self {
        Self {
            config,
            history: VecDeque::with_capacity(360),
            low_grip_since: None,
            last_high_g: f64::NEG_INFINITY,
            last_rough: f64::NEG_INFINITY,
            last_underused: f64::NEG_INFINITY,
        }
    }

    /// Estimated front-axle load share under the current longitudinal g,
    /// clamped to a plausible range.
    pub fn front_axle_load(long_accel_g: f64) -> f64 {
        (0.45 - 0.1 * long_accel_g).clamp(0.35, 0.65)
    }

    fn grip_circle(&self, lat_g: f64, long_g: f64) -> f64 {
        let lat = lat_g / self.config.max_lat_g;
        let long = long_g / self.config.max_long_g;
        (lat.powi(2) + long.powi(2)).sqrt().min(1.0)
    }

    /// Smoothness over the most recent points: 1 - 2·Var(combined g),
    /// clamped to [0, 1].
    fn smoothness(&self) -> f64 {
        let recent: Vec<f64> = self
            .history
            .iter()
            .rev()
            .take(6)
            .map(|p| p.combined_g)
            .collect();
        (1.0 - 2.0 * variance(&recent)).clamp(0.0, 1.0)
    }
}

impl Detector for DynamicsDetector {
    fn name(&self) -> &'static str {
        "dynamics"
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

        let combined = sample.combined_g();
        let grip = self.grip_circle(sample.lat_accel_g, sample.long_accel_g);
        self.history.push_back(DynamicsPoint { timestamp: now, combined_g: combined, grip_circle: grip });
        let cutoff = now - self.config.window_s;
        while self.history.front().map(|p| p.timestamp < cutoff).unwrap_or(false) {
            self.history.pop_front();
        }

        let mut insights = Vec::new();

        if combined > self.config.high_g_warning && now - self.last_high_g > 10.0 {
            self.last_high_g = now;
            insights.push(PatternInsight {
                situation: Situation::HighGWarning,
                confidence: 0.9,
                importance: 0.8,
                corner_id: cx.corner_id.map(str::to_string),
                description: format!(
                    "High combined load ({combined:.1} g) - ease off to protect the tires"
                ),
                reference: None,
                improvement_potential_s: 0.0,
            });
        }

        // Rough transitions need a sustained window of low smoothness.
        if self.history.len() >= 12 {
            let smooth = self.smoothness();
            if smooth < self.config.rough_smoothness && now - self.last_rough > 15.0 {
                self.last_rough = now;
                insights.push(PatternInsight {
                    situation: Situation::RoughGTransitions,
                    confidence: 0.8,
                    importance: 0.55,
                    corner_id: cx.corner_id.map(str::to_string),
                    description: format!(
                        "G-force transitions are rough ({:.0}% smooth) - focus on progressive inputs",
                        smooth * 100.0
                    ),
                    reference: None,
                    improvement_potential_s: 0.08,
                });
            }
        }

        // Underused grip: the average utilization stays low while actually
        // driving (not crawling down pit lane).
        if sample.speed_mps > 15.0 && self.history.len() >= 12 {
            let grips: Vec<f64> = self.history.iter().map(|p| p.grip_circle).collect();
            let avg_grip = mean(&grips);
            if avg_grip < self.config.underused_grip {
                let since = *self.low_grip_since.get_or_insert(now);
                if now - since >= self.config.underused_hold_s
                    && now - self.last_underused > 20.0
                {
                    self.last_underused = now;
                    insights.push(PatternInsight {
                        situation: Situation::UnderusedGrip,
                        confidence: 0.7,
                        importance: 0.4,
                        corner_id: None,
                        description: format!(
                            "Only using {:.0}% of the grip circle - you can brake and corner harder",
                            avg_grip * 100.0
                        ),
                        reference: None,
                        improvement_potential_s: 0.12,
                    });
                }
            } else {
                self.low_grip_since = None;
            }
        } else {
            self.low_grip_since = None;
        }

        insights
    }
}
