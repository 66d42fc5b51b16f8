//! Braking pattern detection
//!
//! Watches brake application/release edges and aggregates recent braking
//! events. Low average peak pressure is insufficient braking; a sudden
//! heavy application at high speed is a late-braking candidate. Brake and
//! throttle overlap is a mistake at low speed and trail braking at high
//! speed.

use super::{mean, Detector, DetectorContext};
use orc_core::config::BrakingConfig;
use orc_core::model::{PatternInsight, Situation, TelemetrySample};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy)]
struct BrakeEvent {
    timestamp: f64,
    entry_speed_mps: f64,
    peak_pressure: f64,
}

pub struct BrakingDetector {
    config: BrakingConfig,
    prev_brake: f64,
    in_braking: bool,
    current_peak: f64,
    current_entry_speed: f64,
    current_start: f64,
    events: VecDeque<BrakeEvent>,
    last_insufficient: f64,
    last_late: f64,
    last_overlap: f64,
    last_trail: f64,
}

impl BrakingDetector {
    pub fn new(config: BrakingConfig) -> Self {
        Self {
            config,
            prev_brake: 0.0,
            in_braking: false,
            current_peak: 0.0,
            current_entry_speed: 0.0,
            current_start: 0.0,
            events: VecDeque::with_capacity(10),
            last_insufficient: f64::NEG_INFINITY,
            last_late: f64::NEG_INFINITY,
            last_overlap: f64::NEG_INFINITY,
            last_trail: f64::NEG_INFINITY,
        }
    }
}

impl Detector for BrakingDetector {
    fn name(&self) -> &'static str {
        "braking"
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
        let threshold = self.config.apply_threshold;
        let mut insights = Vec::new();

        // Application edge.
        if !self.in_braking && sample.brake > threshold && self.prev_brake <= threshold {
            self.in_braking = true;
            self.current_peak = sample.brake;
            self.current_entry_speed = sample.speed_mps;
            self.current_start = now;

            // Sudden heavy hit at high speed with no prior smoothing samples.
            if sample.speed_mps > self.config.late_brake_speed_mps && sample.brake > 0.3 {
                if now - self.last_late > 10.0 {
                    self.last_late = now;
                    insights.push(PatternInsight {
                        situation: Situation::LateBraking,
                        confidence: 0.7,
                        importance: 0.6,
                        corner_id: cx.corner_id.map(str::to_string),
                        description: format!(
                            "Very abrupt brake application at {:.0} km/h - brake earlier and build pressure",
                            sample.speed_mps * 3.6
                        ),
                        reference: None,
                        improvement_potential_s: 0.1,
                    });
                }
            }
        } else if self.in_braking {
            self.current_peak = self.current_peak.max(sample.brake);
            // Release edge.
            if sample.brake < threshold {
                self.in_braking = false;
                self.events.push_back(BrakeEvent {
                    timestamp: now,
                    entry_speed_mps: self.current_entry_speed,
                    peak_pressure: self.current_peak,
                });
                if self.events.len() > 10 {
                    self.events.pop_front();
                }
            }
        }
        self.prev_brake = sample.brake;

        // Aggregate check over recent events.
        let recent: Vec<&BrakeEvent> =
            self.events.iter().filter(|e| now - e.timestamp < 30.0).collect();
        if recent.len() >= self.config.min_events && now - self.last_insufficient > 20.0 {
            let peaks: Vec<f64> = recent.iter().map(|e| e.peak_pressure).collect();
            let avg_peak = mean(&peaks);
            if avg_peak < self.config.insufficient_peak {
                self.last_insufficient = now;
                insights.push(PatternInsight {
                    situation: Situation::InsufficientBraking,
                    confidence: 0.8,
                    importance: 0.6,
                    corner_id: cx.corner_id.map(str::to_string),
                    description: format!(
                        "Average peak brake pressure only {:.0}% across recent braking zones",
                        avg_peak * 100.0
                    ),
                    reference: None,
                    improvement_potential_s: recent
                        .iter()
                        .map(|e| e.entry_speed_mps)
                        .fold(0.0, f64::max)
                        * 0.002,
                });
            }
        }

        // Brake/throttle overlap.
        if sample.brake > 0.15 && sample.throttle > 0.15 {
            if sample.speed_mps < self.config.overlap_mistake_speed_mps {
                if now - self.last_overlap > 10.0 {
                    self.last_overlap = now;
                    insights.push(PatternInsight {
                        situation: Situation::InputOverlap,
                        confidence: 0.75,
                        importance: 0.6,
                        corner_id: cx.corner_id.map(str::to_string),
                        description: "Brake and throttle overlapping at low speed - choose one input"
                            .to_string(),
                        reference: None,
                        improvement_potential_s: 0.05,
                    });
                }
            } else if sample.speed_mps > self.config.trail_brake_speed_mps {
                // Positive technique; surfaced only occasionally.
                if now - self.last_trail > 15.0 {
                    self.last_trail = now;
                    insights.push(PatternInsight {
                        situation: Situation::TrailBraking,
                        confidence: 0.6,
                        importance: 0.2,
                        corner_id: cx.corner_id.map(str::to_string),
                        description: "Good trail braking - overlapping inputs are rotating the car"
                            .to_string(),
                        reference: None,
                        improvement_potential_s: 0.0,
                    });
                }
            }
        }

        insights
    }
}
