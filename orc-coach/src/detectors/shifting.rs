//! Gear shift analysis
//!
//! Tracks gear changes against per-gear optimal upshift RPM bands, scores
//! rev matching on downshifts, spots missed engine braking, and raises
//! sustained wrong-gear advisories. Bands adapt toward the shift points
//! observed on laps close to the personal best.

use super::{mean, stddev, Detector, DetectorContext};
use orc_core::config::ShiftConfig;
use orc_core::model::{PatternInsight, Situation, TelemetrySample};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Upshift,
    Downshift,
}

#[derive(Debug, Clone, Copy)]
pub struct ShiftEvent {
    pub timestamp: f64,
    pub from_gear: i8,
    pub to_gear: i8,
    pub kind: ShiftKind,
    /// RPM just before the shift.
    pub rpm_at_shift: f64,
    pub speed_mps: f64,
    pub throttle: f64,
    pub brake: f64,
    pub shift_duration_s: f64,
    /// RPM rise across a downshift.
    pub rpm_rise: Option<f64>,
    /// 0-100; closeness of the rise to the calibrated target.
    pub rev_match_quality: Option<f64>,
    /// Throttle was released during a braking downshift.
    pub engine_braking: bool,
    /// True when the owning lap landed within tolerance of the best.
    pub on_good_lap: bool,
}

pub struct ShiftDetector {
    config: ShiftConfig,
    bands: BTreeMap<i8, (f64, f64)>,
    history: VecDeque<ShiftEvent>,
    prev_gear: Option<i8>,
    prev_rpm: f64,
    last_shift_time: f64,
    /// Shifts accumulated during the current lap, flagged good/bad when the
    /// lap completes.
    lap_shift_start: usize,
    gear_high_since: Option<f64>,
    gear_low_since: Option<f64>,
    last_timing_insight: f64,
    last_rev_match_insight: f64,
    last_engine_brake_insight: f64,
    last_advisory: f64,
}

impl ShiftDetector {
    pub fn new(config: ShiftConfig, bands: BTreeMap<i8, (f64, f64)>) -> Self {
        Self {
            config,
            bands,
            history: VecDeque::with_capacity(100),
            prev_gear: None,
            prev_rpm: 0.0,
            last_shift_time: 0.0,
            lap_shift_start: 0,
            gear_high_since: None,
            gear_low_since: None,
            last_timing_insight: f64::NEG_INFINITY,
            last_rev_match_insight: f64::NEG_INFINITY,
            last_engine_brake_insight: f64::NEG_INFINITY,
            last_advisory: f64::NEG_INFINITY,
        }
    }

    /// Current learned bands, persisted with the session.
    pub fn bands(&self) -> &BTreeMap<i8, (f64, f64)> {
        &self.bands
    }

    /// Mark this lap's shifts and re-learn bands from good-lap upshifts.
    pub fn on_lap_completed(&mut self, lap_time_s: f64, best_lap_time_s: Option<f64>) {
        let good = best_lap_time_s
            .map(|best| lap_time_s <= best * (1.0 + self.config.good_lap_tolerance))
            .unwrap_or(false);
        let start = self.lap_shift_start.min(self.history.len());
        for event in self.history.iter_mut().skip(start) {
            event.on_good_lap = good;
        }
        self.lap_shift_start = self.history.len();
        if good {
            self.learn_bands();
        }
    }

    fn learn_bands(&mut self) {
        for gear in 1..=6_i8 {
            let rpms: Vec<f64> = self
                .history
                .iter()
                .filter(|e| {
                    e.kind == ShiftKind::Upshift && e.from_gear == gear && e.on_good_lap
                })
                .map(|e| e.rpm_at_shift)
                .collect();
            if rpms.len() < self.config.min_shifts_to_learn {
                continue;
            }
            let avg = mean(&rpms);
            let sd = stddev(&rpms);
            let new_min = (avg - sd).max(5000.0);
            let new_max = (avg + sd).min(8000.0);
            let keep = self.config.band_blend_keep;
            let entry = self.bands.entry(gear).or_insert((new_min, new_max));
            entry.0 = entry.0 * keep + new_min * (1.0 - keep);
            entry.1 = entry.1 * keep + new_max * (1.0 - keep);
            debug!(gear, min = entry.0, max = entry.1, "updated shift band");
        }
    }

    fn record_shift(&mut self, sample: &TelemetrySample, from: i8, to: i8) -> ShiftEvent {
        let now = sample.timestamp;
        let kind = if to > from { ShiftKind::Upshift } else { ShiftKind::Downshift };

        let (rpm_rise, rev_match_quality, engine_braking) = if kind == ShiftKind::Downshift {
            let rise = sample.rpm - self.prev_rpm;
            let quality = (100.0
                - (rise - self.config.rev_match_target_rpm).abs() / 10.0)
                .max(0.0);
            let engine_braking = sample.throttle < 0.1;
            (Some(rise), Some(quality), engine_braking)
        } else {
            (None, None, false)
        };

        let event = ShiftEvent {
            timestamp: now,
            from_gear: from,
            to_gear: to,
            kind,
            rpm_at_shift: self.prev_rpm,
            speed_mps: sample.speed_mps,
            throttle: sample.throttle,
            brake: sample.brake,
            shift_duration_s: if self.last_shift_time > 0.0 { now - self.last_shift_time } else { 0.0 },
            rpm_rise,
            rev_match_quality,
            engine_braking,
            on_good_lap: false,
        };
        self.last_shift_time = now;
        self.history.push_back(event);
        if self.history.len() > 100 {
            self.history.pop_front();
            self.lap_shift_start = self.lap_shift_start.saturating_sub(1);
        }
        event
    }

    fn timing_insight(&mut self, event: &ShiftEvent, now: f64) -> Option<PatternInsight> {
        if event.kind != ShiftKind::Upshift {
            return None;
        }
        let (low, high) = *self.bands.get(&event.from_gear)?;
        let center = (low + high) / 2.0;
        let deviation = event.rpm_at_shift - center;
        if deviation.abs() <= self.config.band_deviation_rpm {
            return None;
        }
        if now - self.last_timing_insight < 10.0 {
            return None;
        }
        self.last_timing_insight = now;
        let severity = (deviation.abs() / 1500.0).clamp(0.0, 1.0);
        let (situation, description) = if deviation < 0.0 {
            (
                Situation::ShiftEarly,
                format!(
                    "Shifting out of gear {} about {:.0} RPM early - hold it longer for more drive",
                    event.from_gear,
                    deviation.abs()
                ),
            )
        } else {
            (
                Situation::ShiftLate,
                format!(
                    "Shifting out of gear {} about {:.0} RPM late - shift sooner to stay in the power band",
                    event.from_gear, deviation
                ),
            )
        };
        Some(PatternInsight {
            situation,
            confidence: 0.8,
            importance: (0.4 + severity * 0.3).min(0.7),
            corner_id: None,
            description,
            reference: None,
            improvement_potential_s: 0.03,
        })
    }

    fn downshift_insights(&mut self, now: f64) -> Vec<PatternInsight> {
        let mut out = Vec::new();
        let recent: Vec<&ShiftEvent> = self
            .history
            .iter()
            .filter(|e| e.kind == ShiftKind::Downshift && now - e.timestamp < 30.0)
            .collect();

        let poor: Vec<&&ShiftEvent> = recent
            .iter()
            .filter(|e| e.rev_match_quality.unwrap_or(100.0) < self.config.poor_rev_match_quality)
            .collect();
        if poor.len() >= 2 && now - self.last_rev_match_insight > 20.0 {
            self.last_rev_match_insight = now;
            out.push(PatternInsight {
                situation: Situation::PoorRevMatching,
                confidence: 0.75,
                importance: 0.45,
                corner_id: None,
                description: "Rev matching could improve - blip the throttle on downshifts"
                    .to_string(),
                reference: None,
                improvement_potential_s: 0.02,
            });
        }

        let missed: Vec<&&ShiftEvent> = recent
            .iter()
            .filter(|e| !e.engine_braking && e.brake > 0.3)
            .collect();
        if missed.len() >= 2 && now - self.last_engine_brake_insight > 20.0 {
            self.last_engine_brake_insight = now;
            out.push(PatternInsight {
                situation: Situation::MissedEngineBraking,
                confidence: 0.7,
                importance: 0.4,
                corner_id: None,
                description: "Release the throttle on braking downshifts to use engine braking"
                    .to_string(),
                reference: None,
                improvement_potential_s: 0.08,
            });
        }
        out
    }

    fn gear_advisories(&mut self, sample: &TelemetrySample) -> Option<PatternInsight> {
        let now = sample.timestamp;
        let hold = self.config.advisory_hold_s;

        // Lugging: low RPM under load in a tall gear.
        if sample.rpm > 0.0
            && sample.rpm < 2000.0
            && sample.throttle > 0.4
            && sample.speed_mps > 18.0
            && sample.gear > 1
        {
            let since = *self.gear_high_since.get_or_insert(now);
            if now - since > hold && now - self.last_advisory > 15.0 {
                self.last_advisory = now;
                return Some(PatternInsight {
                    situation: Situation::GearTooHigh,
                    confidence: 0.75,
                    importance: 0.45,
                    corner_id: None,
                    description: "RPM is low for this speed and throttle - consider downshifting"
                        .to_string(),
                    reference: None,
                    improvement_potential_s: 0.05,
                });
            }
        } else {
            self.gear_high_since = None;
        }

        // Screaming: high RPM at low speed.
        if sample.rpm > 7000.0 && sample.speed_mps < 26.8 && sample.gear > 1 {
            let since = *self.gear_low_since.get_or_insert(now);
            if now - since > hold && now - self.last_advisory > 15.0 {
                self.last_advisory = now;
                return Some(PatternInsight {
                    situation: Situation::GearTooLow,
                    confidence: 0.75,
                    importance: 0.45,
                    corner_id: None,
                    description: "RPM is high for this speed - consider upshifting".to_string(),
                    reference: None,
                    improvement_potential_s: 0.03,
                });
            }
        } else {
            self.gear_low_since = None;
        }

        None
    }
}

impl Detector for ShiftDetector {
    fn name(&self) -> &'static str {
        "shifting"
    }

    fn scan(
        &mut self,
        snapshot: &[TelemetrySample],
        _cx: &DetectorContext<'_>,
    ) -> Vec<PatternInsight> {
        let Some(sample) = snapshot.last() else {
            return Vec::new();
        };
        let now = sample.timestamp;
        let mut insights = Vec::new();

        if let Some(prev) = self.prev_gear {
            if sample.gear != prev && prev > 0 && sample.gear > 0 {
                let event = self.record_shift(sample, prev, sample.gear);
                if let Some(insight) = self.timing_insight(&event, now) {
                    insights.push(insight);
                }
                if event.kind == ShiftKind::Downshift {
                    insights.extend(self.downshift_insights(now));
                }
            }
        }

        if let Some(advisory) = self.gear_advisories(sample) {
            insights.push(advisory);
        }

        self.prev_gear = Some(sample.gear);
        self.prev_rpm = sample.rpm;
        insights
    }
}
