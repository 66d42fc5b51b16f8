//! Corner micro-analysis
//!
//! Tracks corner traversals with a small state machine (idle until steering
//! exceeds the entry threshold, buffering until it falls below the exit
//! threshold) and, on completion, compares the traversal against the
//! corner's reference: timing deltas in seconds, speed deltas in km/h,
//! input deltas, racing-line deviation and a time-loss breakdown.
//!
//! Sign conventions: brake timing positive = braked late; throttle timing
//! positive = applied early.

use orc_core::config::MicroConfig;
use orc_core::model::{
    CornerDifficulty, CornerReference, CornerSpeedClass, DetectedPattern, MessagePriority,
    MicroAnalysis, MicroPattern, TelemetrySample, TimeLossBreakdown,
};
use orc_core::units::mps_to_kph;
use tracing::debug;

/// A completed pass through one corner.
#[derive(Debug, Clone)]
pub struct CornerTraversal {
    pub corner_id: String,
    pub corner_name: String,
    pub entry_fraction: f64,
    pub samples: Vec<TelemetrySample>,
}

/// State machine that buffers samples between corner entry and exit.
pub struct CornerTracker {
    config: MicroConfig,
    active: Option<CornerTraversal>,
}

impl CornerTracker {
    pub fn new(config: MicroConfig) -> Self {
        Self { config, active: None }
    }

    pub fn in_corner(&self) -> bool {
        self.active.is_some()
    }

    /// Feed one sample. Returns the finished traversal when the corner
    /// closes on this sample.
    pub fn update(
        &mut self,
        sample: &TelemetrySample,
        corner_id: Option<&str>,
        corner_name: Option<&str>,
    ) -> Option<CornerTraversal> {
        let steering = sample.steering_rad.abs();

        match &mut self.active {
            None => {
                if steering > self.config.entry_steering_rad {
                    let id = corner_id
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("corner_{:.2}", sample.lap_dist_pct));
                    let name = corner_name.map(str::to_string).unwrap_or_else(|| id.clone());
                    debug!(corner = %id, "corner entry");
                    self.active = Some(CornerTraversal {
                        corner_id: id,
                        corner_name: name,
                        entry_fraction: sample.lap_dist_pct,
                        samples: vec![sample.clone()],
                    });
                }
                None
            }
            Some(traversal) => {
                traversal.samples.push(sample.clone());
                if steering < self.config.exit_steering_rad
                    && traversal.samples.len() > self.config.min_samples
                {
                    debug!(corner = %traversal.corner_id, samples = traversal.samples.len(), "corner exit");
                    return self.active.take();
                }
                None
            }
        }
    }

    /// Abandon any in-flight corner (session reset, track change).
    pub fn reset(&mut self) {
        self.active = None;
    }
}

/// Derive a corner reference from a traversal, used the first time a corner
/// is seen on a lap worth learning from.
pub fn derive_reference(
    traversal: &CornerTraversal,
    track_name: &str,
    car_name: &str,
    config: &MicroConfig,
) -> Option<CornerReference> {
    let samples = &traversal.samples;
    if samples.is_empty() {
        return None;
    }

    let speeds: Vec<f64> = samples.iter().map(|s| s.speed_mps).collect();
    let positions: Vec<f64> = samples.iter().map(|s| s.lap_dist_pct).collect();

    let brake_idx = samples
        .iter()
        .position(|s| s.brake > config.input_threshold)
        .unwrap_or(0);
    let throttle_idx = samples
        .iter()
        .position(|s| s.throttle > config.input_threshold)
        .unwrap_or(samples.len() - 1);
    let apex_idx = argmin(&speeds);

    let apex_speed = speeds[apex_idx];
    let speed_class = if apex_speed < 20.0 {
        CornerSpeedClass::Slow
    } else if apex_speed < 40.0 {
        CornerSpeedClass::Medium
    } else {
        CornerSpeedClass::HighSpeed
    };

    Some(CornerReference {
        corner_id: traversal.corner_id.clone(),
        corner_name: traversal.corner_name.clone(),
        track_name: track_name.to_string(),
        car_name: car_name.to_string(),
        position_start: positions.first().copied().unwrap_or(0.0),
        position_end: positions.last().copied().unwrap_or(0.0),
        brake_point_pct: positions.get(brake_idx).copied().unwrap_or(0.0),
        brake_pressure: samples.iter().map(|s| s.brake).fold(0.0, f64::max),
        entry_speed_kph: mps_to_kph(speeds[0]),
        apex_speed_kph: mps_to_kph(apex_speed),
        exit_speed_kph: mps_to_kph(*speeds.last().unwrap_or(&0.0)),
        throttle_point_pct: positions.get(throttle_idx).copied().unwrap_or(0.0),
        throttle_pressure: samples.iter().map(|s| s.throttle).fold(0.0, f64::max),
        steering_rad: samples.iter().map(|s| s.steering_rad.abs()).fold(0.0, f64::max),
        racing_line: samples.iter().map(|s| (s.lap_dist_pct, s.steering_rad)).collect(),
        corner_time_s: samples.len() as f64 / 60.0,
        gear: samples.get(samples.len() / 2).map(|s| s.gear).unwrap_or(3),
        speed_class,
        difficulty: CornerDifficulty::Medium,
        notes: "Derived from driven lap".to_string(),
    })
}

/// Full micro-analysis of a traversal against its reference.
pub fn analyze(
    traversal: &CornerTraversal,
    reference: &CornerReference,
    config: &MicroConfig,
) -> MicroAnalysis {
    let samples = &traversal.samples;
    if samples.is_empty() {
        // The tracker never produces an empty traversal; analysis still
        // must not panic on one.
        return empty_analysis(traversal);
    }
    let speeds: Vec<f64> = samples.iter().map(|s| s.speed_mps).collect();
    let positions: Vec<f64> = samples.iter().map(|s| s.lap_dist_pct).collect();
    let steerings: Vec<f64> = samples.iter().map(|s| s.steering_rad).collect();

    let brake_idx = samples.iter().position(|s| s.brake > config.input_threshold);
    let throttle_idx = samples.iter().position(|s| s.throttle > config.input_threshold);
    let apex_idx = argmin(&speeds);

    // Position deltas to seconds via the lap-fraction scale.
    let scale = config.fraction_to_seconds;
    let brake_timing_delta = brake_idx
        .map(|i| (positions[i] - reference.brake_point_pct) * scale)
        .unwrap_or(0.0);
    let throttle_timing_delta = throttle_idx
        .map(|i| (reference.throttle_point_pct - positions[i]) * scale)
        .unwrap_or(0.0);

    let entry_speed_delta = mps_to_kph(speeds[0]) - reference.entry_speed_kph;
    let apex_speed_delta = mps_to_kph(speeds[apex_idx]) - reference.apex_speed_kph;
    let exit_speed_delta =
        mps_to_kph(*speeds.last().unwrap_or(&0.0)) - reference.exit_speed_kph;

    let max_brake = samples.iter().map(|s| s.brake).fold(0.0, f64::max);
    let max_throttle = samples.iter().map(|s| s.throttle).fold(0.0, f64::max);
    let max_steering = steerings.iter().map(|s| s.abs()).fold(0.0, f64::max);

    let brake_pressure_delta = max_brake - reference.brake_pressure;
    let throttle_pressure_delta = max_throttle - reference.throttle_pressure;
    let steering_angle_delta_deg = (max_steering - reference.steering_rad).to_degrees();

    let racing_line_deviation = line_deviation(&steerings, &reference.racing_line);
    let line_smoothness = smoothness(&steerings);

    let loss_breakdown = TimeLossBreakdown {
        brake_timing: brake_timing_delta.abs() * 0.1,
        throttle_timing: throttle_timing_delta.abs() * 0.1,
        entry_speed: entry_speed_delta.abs() * 0.01,
        apex_speed: apex_speed_delta.abs() * 0.02,
        exit_speed: exit_speed_delta.abs() * 0.01,
    };
    let total_time_loss = loss_breakdown.brake_timing
        + loss_breakdown.throttle_timing
        + loss_breakdown.entry_speed
        + loss_breakdown.apex_speed
        + loss_breakdown.exit_speed;

    let patterns = classify_patterns(traversal, reference, config);

    let feedback = build_feedback(
        brake_timing_delta,
        throttle_timing_delta,
        entry_speed_delta,
        apex_speed_delta,
        exit_speed_delta,
        brake_pressure_delta,
        throttle_pressure_delta,
        &patterns,
        total_time_loss,
    );

    let priority = priority_for(total_time_loss, &patterns);

    MicroAnalysis {
        corner_id: traversal.corner_id.clone(),
        corner_name: traversal.corner_name.clone(),
        brake_timing_delta_s: brake_timing_delta,
        throttle_timing_delta_s: throttle_timing_delta,
        entry_speed_delta_kph: entry_speed_delta,
        apex_speed_delta_kph: apex_speed_delta,
        exit_speed_delta_kph: exit_speed_delta,
        brake_pressure_delta,
        throttle_pressure_delta,
        steering_angle_delta_deg,
        racing_line_deviation,
        line_smoothness,
        total_time_loss_s: total_time_loss,
        loss_breakdown,
        patterns,
        feedback,
        priority,
    }
}

fn empty_analysis(traversal: &CornerTraversal) -> MicroAnalysis {
    MicroAnalysis {
        corner_id: traversal.corner_id.clone(),
        corner_name: traversal.corner_name.clone(),
        brake_timing_delta_s: 0.0,
        throttle_timing_delta_s: 0.0,
        entry_speed_delta_kph: 0.0,
        apex_speed_delta_kph: 0.0,
        exit_speed_delta_kph: 0.0,
        brake_pressure_delta: 0.0,
        throttle_pressure_delta: 0.0,
        steering_angle_delta_deg: 0.0,
        racing_line_deviation: 0.0,
        line_smoothness: 1.0,
        total_time_loss_s: 0.0,
        loss_breakdown: TimeLossBreakdown::default(),
        patterns: Vec::new(),
        feedback: Vec::new(),
        priority: MessagePriority::Low,
    }
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v < values[best] {
            best = i;
        }
    }
    best
}

/// Mean absolute steering difference against the reference line, paired by
/// index.
fn line_deviation(steerings: &[f64], reference_line: &[(f64, f64)]) -> f64 {
    let n = steerings.len().min(reference_line.len());
    if n == 0 {
        return 0.0;
    }
    let sum: f64 = steerings
        .iter()
        .zip(reference_line.iter())
        .take(n)
        .map(|(s, (_, r))| (s.abs() - r.abs()).abs())
        .sum();
    sum / n as f64
}

/// 1 - mean(|steering step|)/0.5, clamped to [0, 1]; 1.0 for short inputs.
fn smoothness(steerings: &[f64]) -> f64 {
    if steerings.len() < 2 {
        return 1.0;
    }
    let changes: f64 = steerings.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    let avg = changes / (steerings.len() - 1) as f64;
    (1.0 - avg / 0.5).clamp(0.0, 1.0)
}

fn classify_patterns(
    traversal: &CornerTraversal,
    reference: &CornerReference,
    config: &MicroConfig,
) -> Vec<DetectedPattern> {
    let samples = &traversal.samples;
    let mut patterns = Vec::new();
    if samples.is_empty() {
        return patterns;
    }

    let speeds: Vec<f64> = samples.iter().map(|s| s.speed_mps).collect();
    let positions: Vec<f64> = samples.iter().map(|s| s.lap_dist_pct).collect();
    let apex_idx = argmin(&speeds);
    let apex_pos = positions[apex_idx];

    // Apex timing relative to the reference throttle point.
    if reference.throttle_point_pct > 1e-6 {
        let apex_delta = (apex_pos - reference.throttle_point_pct) / reference.throttle_point_pct;
        if apex_delta > 0.1 {
            patterns.push(DetectedPattern {
                pattern: MicroPattern::LateApex,
                confidence: (apex_delta / 0.2).min(1.0),
            });
        } else if apex_delta < -0.1 {
            patterns.push(DetectedPattern {
                pattern: MicroPattern::EarlyApex,
                confidence: (apex_delta.abs() / 0.2).min(1.0),
            });
        }
    }

    // Off-throttle oversteer: lifted with a high yaw rate.
    if let Some(worst) = samples
        .iter()
        .filter(|s| s.throttle < 0.2 && s.yaw_rate_rps.abs() > 0.3)
        .map(|s| s.yaw_rate_rps.abs())
        .fold(None::<f64>, |acc, v| Some(acc.map_or(v, |a| a.max(v))))
    {
        patterns.push(DetectedPattern {
            pattern: MicroPattern::OffThrottleOversteer,
            confidence: (worst / 0.5).min(1.0),
        });
    }

    // Understeer: lots of lock, little yaw.
    let max_steering = samples.iter().map(|s| s.steering_rad.abs()).fold(0.0, f64::max);
    let avg_yaw = samples.iter().map(|s| s.yaw_rate_rps.abs()).sum::<f64>() / samples.len() as f64;
    if max_steering > 0.8 && avg_yaw < 0.1 {
        let mean_speed = speeds.iter().sum::<f64>() / speeds.len() as f64;
        let pattern = if mean_speed > 26.8 {
            MicroPattern::HighSpeedUndersteer
        } else {
            MicroPattern::Understeer
        };
        patterns.push(DetectedPattern { pattern, confidence: max_steering.min(1.0) });
    }

    // Trail braking: brake held while steering for a meaningful share.
    let overlapped = samples
        .iter()
        .filter(|s| s.brake > 0.2 && s.steering_rad.abs() > 0.1)
        .count();
    if overlapped as f64 > samples.len() as f64 * 0.3 {
        patterns.push(DetectedPattern {
            pattern: MicroPattern::TrailBraking,
            confidence: overlapped as f64 / samples.len() as f64,
        });
    }

    // Throttle timing relative to the reference application point.
    if let Some(ti) = samples.iter().position(|s| s.throttle > config.input_threshold) {
        if reference.throttle_point_pct > 1e-6 {
            let rel = (reference.throttle_point_pct - positions[ti]) / reference.throttle_point_pct;
            if rel > 0.15 {
                patterns.push(DetectedPattern {
                    pattern: MicroPattern::EarlyThrottle,
                    confidence: (rel / 0.3).min(1.0),
                });
            } else if rel < -0.15 {
                patterns.push(DetectedPattern {
                    pattern: MicroPattern::LateThrottle,
                    confidence: (rel.abs() / 0.3).min(1.0),
                });
            }
        }
    }

    // Inconsistent inputs: sawing at the wheel through the corner. A
    // normal traversal ramps pedals hard, so raw pedal variance would fire
    // everywhere; steering smoothness is the discriminating signal.
    let steer_trace: Vec<f64> = samples.iter().map(|s| s.steering_rad).collect();
    let smooth = smoothness(&steer_trace);
    if smooth < 0.4 {
        patterns.push(DetectedPattern {
            pattern: MicroPattern::InconsistentInputs,
            confidence: (1.0 - smooth).min(1.0),
        });
    }

    patterns
}

#[allow(clippy::too_many_arguments)]
fn build_feedback(
    brake_timing: f64,
    throttle_timing: f64,
    entry_delta: f64,
    apex_delta: f64,
    exit_delta: f64,
    brake_pressure_delta: f64,
    throttle_pressure_delta: f64,
    patterns: &[DetectedPattern],
    total_time_loss: f64,
) -> Vec<String> {
    let mut feedback = Vec::new();

    if brake_timing > 0.05 {
        feedback.push(format!("Braked {brake_timing:.2}s too late"));
    } else if brake_timing < -0.05 {
        feedback.push(format!("Braked {:.2}s too early", brake_timing.abs()));
    }

    if throttle_timing > 0.05 {
        feedback.push(format!("Applied throttle {throttle_timing:.2}s too early"));
    } else if throttle_timing < -0.05 {
        feedback.push(format!("Applied throttle {:.2}s too late", throttle_timing.abs()));
    }

    if apex_delta < -2.0 {
        feedback.push(format!("Apex speed down {:.1} km/h", apex_delta.abs()));
    } else if apex_delta > 2.0 {
        feedback.push(format!("Apex speed up {apex_delta:.1} km/h - good"));
    }

    if entry_delta < -5.0 {
        feedback.push(format!("Entry speed down {:.1} km/h", entry_delta.abs()));
    } else if entry_delta > 5.0 {
        feedback.push(format!("Entry speed up {entry_delta:.1} km/h"));
    }

    if exit_delta < -3.0 {
        feedback.push(format!("Exit speed down {:.1} km/h", exit_delta.abs()));
    } else if exit_delta > 3.0 {
        feedback.push(format!("Exit speed up {exit_delta:.1} km/h - good"));
    }

    if brake_pressure_delta < -0.2 {
        feedback.push(format!(
            "Brake pressure {:.0}% below the reference",
            brake_pressure_delta.abs() * 100.0
        ));
    }
    if throttle_pressure_delta < -0.3 {
        feedback.push(format!(
            "Throttle application {:.0}% below the reference",
            throttle_pressure_delta.abs() * 100.0
        ));
    }

    for detected in patterns {
        let text = match detected.pattern {
            MicroPattern::LateApex => "Apex too late - turn in earlier",
            MicroPattern::EarlyApex => "Apex too early - turn in later",
            MicroPattern::OffThrottleOversteer => {
                "Off-throttle oversteer - smoother lift mid-corner"
            }
            MicroPattern::Understeer => "Understeer - reduce steering input",
            MicroPattern::HighSpeedUndersteer => "High-speed understeer - slow the entry",
            MicroPattern::TrailBraking => "Trail braking - good technique",
            MicroPattern::EarlyThrottle => "Throttle too early - wait for the apex",
            MicroPattern::LateThrottle => "Throttle too late - apply earlier",
            MicroPattern::InconsistentInputs => "Inconsistent inputs - smooth it out",
        };
        feedback.push(text.to_string());
    }

    if total_time_loss > 0.5 {
        feedback.push(format!("Total time loss {total_time_loss:.2}s in this corner"));
    }

    feedback
}

/// Critical handling patterns escalate regardless of the numeric loss; the
/// medium band starts at 0.1 s.
fn priority_for(total_time_loss: f64, patterns: &[DetectedPattern]) -> MessagePriority {
    let critical = patterns.iter().any(|p| {
        matches!(
            p.pattern,
            MicroPattern::OffThrottleOversteer | MicroPattern::HighSpeedUndersteer
        )
    });
    if critical {
        MessagePriority::Critical
    } else if total_time_loss > 0.5 {
        MessagePriority::High
    } else if total_time_loss > 0.1 {
        MessagePriority::Medium
    } else {
        MessagePriority::Low
    }
}
