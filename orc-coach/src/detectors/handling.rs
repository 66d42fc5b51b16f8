//! Understeer / oversteer detection
//!
//! Compares the measured yaw rate against the yaw rate expected from
//! steering angle and speed. A yaw response well above expectation is
//! oversteer, well below is understeer; throttle and brake at the moment of
//! detection pick the sub-case.

use super::{mean, Detector, DetectorContext};
use orc_core::config::HandlingConfig;
use orc_core::model::{PatternInsight, Situation, TelemetrySample};
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum Direction {
    Understeer,
    Oversteer,
}

pub struct HandlingDetector {
    config: HandlingConfig,
    /// Last emission per (corner, direction), for the cooldown.
    last_event: HashMap<(String, Direction), f64>,
    /// Rolling event timestamps per corner, bounded.
    corner_events: HashMap<String, Vec<f64>>,
}

impl HandlingDetector {
    pub fn new(config: HandlingConfig) -> Self {
        Self {
            config,
            last_event: HashMap::new(),
            corner_events: HashMap::new(),
        }
    }

    fn expected_yaw_rate(&self, steering: f64, speed: f64) -> f64 {
        steering.abs() * (speed / 100.0) * self.config.yaw_calibration
    }

    fn on_cooldown(&self, corner: &str, direction: Direction, now: f64) -> bool {
        self.last_event
            .get(&(corner.to_string(), direction))
            .map(|t| now - t < self.config.event_cooldown_s)
            .unwrap_or(false)
    }

    fn record(&mut self, corner: &str, direction: Direction, now: f64) {
        self.last_event.insert((corner.to_string(), direction), now);
        let events = self.corner_events.entry(corner.to_string()).or_default();
        events.push(now);
        let cap = self.config.max_events_per_corner;
        if events.len() > cap {
            let excess = events.len() - cap;
            events.drain(..excess);
        }
    }
}

impl Detector for HandlingDetector {
    fn name(&self) -> &'static str {
        "handling"
    }

    fn scan(
        &mut self,
        snapshot: &[TelemetrySample],
        cx: &DetectorContext<'_>,
    ) -> Vec<PatternInsight> {
        let Some(latest) = snapshot.last() else {
            return Vec::new();
        };
        let now = latest.timestamp;

        // Gate on meaningful cornering.
        if latest.speed_mps < self.config.min_speed_mps
            || latest.steering_rad.abs() < self.config.min_steering_rad
        {
            return Vec::new();
        }

        // Average the yaw-response ratio over the trailing window.
        let cutoff = now - self.config.window_s;
        let mut yaw_ratios = Vec::new();
        for s in snapshot.iter().filter(|s| s.timestamp >= cutoff) {
            if s.steering_rad.abs() < 0.05 || s.speed_mps < self.config.min_speed_mps {
                continue;
            }
            let expected = self.expected_yaw_rate(s.steering_rad, s.speed_mps);
            if expected > 1e-3 {
                yaw_ratios.push(s.yaw_rate_rps.abs() / expected);
            }
        }
        if yaw_ratios.len() < 5 {
            return Vec::new();
        }
        let avg_ratio = mean(&yaw_ratios);

        let corner = cx.corner_id.unwrap_or("unknown");
        let corner_name = cx.corner_name.unwrap_or("this corner");
        let mut insights = Vec::new();

        if avg_ratio > self.config.oversteer_ratio && latest.slip_angle() > 0.1 {
            if self.on_cooldown(corner, Direction::Oversteer, now) {
                return Vec::new();
            }
            self.record(corner, Direction::Oversteer, now);
            let severity = ((avg_ratio - 1.0) / 0.5).clamp(0.0, 1.0);

            let (situation, description) = if latest.throttle > 0.3 {
                (
                    Situation::PowerOversteer,
                    format!("Oversteer on throttle in {corner_name} - ease into the power more gradually"),
                )
            } else if latest.brake > 0.3 {
                (
                    Situation::TrailBrakeOversteer,
                    format!("Oversteer under braking in {corner_name} - release the brake more progressively"),
                )
            } else {
                (
                    Situation::Oversteer,
                    format!("Oversteer in {corner_name} - smoother inputs will settle the rear"),
                )
            };
            debug!(corner, ratio = avg_ratio, "oversteer detected");
            insights.push(PatternInsight {
                situation,
                confidence: 0.8,
                importance: severity.max(0.5),
                corner_id: Some(corner.to_string()),
                description,
                reference: None,
                improvement_potential_s: 0.12,
            });
        } else if avg_ratio < self.config.understeer_ratio && latest.steering_rad.abs() > 0.2 {
            if self.on_cooldown(corner, Direction::Understeer, now) {
                return Vec::new();
            }
            self.record(corner, Direction::Understeer, now);
            let severity = ((self.config.understeer_ratio - avg_ratio) / 0.3).clamp(0.0, 1.0);

            let (situation, description) = if latest.speed_mps > 26.8 {
                (
                    Situation::HighSpeedUndersteer,
                    format!("High-speed understeer in {corner_name} - reduce entry speed or trail brake"),
                )
            } else if latest.throttle > 0.5 {
                (
                    Situation::PowerUndersteer,
                    format!("Power understeer in {corner_name} - wait for rotation before throttle"),
                )
            } else {
                (
                    Situation::Understeer,
                    format!("Understeer in {corner_name} - slow down more before turn-in"),
                )
            };
            debug!(corner, ratio = avg_ratio, "understeer detected");
            insights.push(PatternInsight {
                situation,
                confidence: 0.85,
                importance: severity.max(0.5),
                corner_id: Some(corner.to_string()),
                description,
                reference: None,
                improvement_potential_s: 0.2,
            });
        }

        insights
    }
}
