//! Mistake tracking
//!
//! Converts micro-analyses that actually cost time into `MistakeEvent`s,
//! aggregates them per (kind, corner) into `MistakePattern`s with rolling
//! recent counts and severity trends, and rolls the session up into a
//! summary with recommendations.

use orc_core::config::MistakeConfig;
use orc_core::model::{
    MessagePriority, MicroAnalysis, MicroPattern, MistakeEvent, MistakeKind, MistakePattern,
    SessionSummary, Trend,
};
use std::collections::BTreeMap;
use tracing::debug;

pub struct MistakeTracker {
    config: MistakeConfig,
    session_id: String,
    session_start: f64,
    events: Vec<MistakeEvent>,
    patterns: BTreeMap<(MistakeKind, String), MistakePattern>,
}

impl MistakeTracker {
    pub fn new(config: MistakeConfig, session_id: String, session_start: f64) -> Self {
        Self {
            config,
            session_id,
            session_start,
            events: Vec::new(),
            patterns: BTreeMap::new(),
        }
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn total_time_lost(&self) -> f64 {
        self.events.iter().map(|e| e.time_loss_s).sum()
    }

    /// Classify and record a mistake from a micro-analysis. Returns `None`
    /// when the loss is below the tracking floor.
    pub fn record(&mut self, analysis: &MicroAnalysis, now: f64) -> Option<MistakeEvent> {
        if analysis.total_time_loss_s < self.config.min_time_loss_s {
            return None;
        }

        let kind = classify(analysis);
        // Severity normalized against a 0.5 s loss.
        let severity = (analysis.total_time_loss_s / 0.5).min(1.0);

        let event = MistakeEvent {
            kind,
            corner_id: analysis.corner_id.clone(),
            corner_name: analysis.corner_name.clone(),
            timestamp: now,
            severity,
            time_loss_s: analysis.total_time_loss_s,
            description: kind.description().to_string(),
        };
        debug!(kind = ?kind, corner = %event.corner_id, loss = event.time_loss_s, "mistake recorded");

        self.events.push(event.clone());
        self.update_pattern(&event, now);
        Some(event)
    }

    fn update_pattern(&mut self, event: &MistakeEvent, now: f64) {
        let key = (event.kind, event.corner_id.clone());
        let recent_count = self.recent_count(&key, now);
        let trend = self.trend_for(&key);

        let pattern = self.patterns.entry(key).or_insert_with(|| MistakePattern {
            kind: event.kind,
            corner_id: event.corner_id.clone(),
            corner_name: event.corner_name.clone(),
            frequency: 0,
            total_time_loss_s: 0.0,
            avg_time_loss_s: 0.0,
            first_occurrence: event.timestamp,
            last_occurrence: event.timestamp,
            recent_frequency: 0,
            trend: Trend::Stable,
            priority: MessagePriority::Low,
            description: event.description.clone(),
        });

        pattern.frequency += 1;
        pattern.total_time_loss_s += event.time_loss_s;
        pattern.avg_time_loss_s = pattern.total_time_loss_s / pattern.frequency as f64;
        pattern.last_occurrence = event.timestamp;
        pattern.recent_frequency = recent_count;
        pattern.trend = trend;
        pattern.priority = priority_for(pattern.frequency, pattern.avg_time_loss_s);
    }

    fn recent_count(&self, key: &(MistakeKind, String), now: f64) -> u32 {
        let cutoff = now - self.config.recent_window_s;
        self.events
            .iter()
            .filter(|e| e.kind == key.0 && e.corner_id == key.1 && e.timestamp >= cutoff)
            .count() as u32
    }

    /// Compare the mean loss of the most recent half of the pattern's
    /// events against the earlier half. Needs at least 4 events.
    fn trend_for(&self, key: &(MistakeKind, String)) -> Trend {
        let losses: Vec<f64> = self
            .events
            .iter()
            .filter(|e| e.kind == key.0 && e.corner_id == key.1)
            .map(|e| e.time_loss_s)
            .collect();
        if losses.len() < 4 {
            return Trend::Stable;
        }
        let mid = losses.len() / 2;
        let earlier = losses[..mid].iter().sum::<f64>() / mid as f64;
        let recent = losses[mid..].iter().sum::<f64>() / (losses.len() - mid) as f64;
        if recent < earlier * 0.8 {
            Trend::Improving
        } else if recent > earlier * 1.2 {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }

    /// Patterns with at least `min_frequency` occurrences, most important
    /// first.
    pub fn persistent_patterns(&self, min_frequency: u32) -> Vec<MistakePattern> {
        let mut patterns: Vec<MistakePattern> = self
            .patterns
            .values()
            .filter(|p| p.frequency >= min_frequency)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(b.frequency.cmp(&a.frequency))
                .then(b.total_time_loss_s.total_cmp(&a.total_time_loss_s))
        });
        patterns
    }

    /// End-of-session rollup: top patterns, improvement areas, score and
    /// recommendations.
    pub fn session_summary(&self, now: f64) -> SessionSummary {
        let persistent = self.persistent_patterns(2);

        let mut most_common = persistent.clone();
        most_common.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        most_common.truncate(5);

        let mut most_costly = persistent.clone();
        most_costly.sort_by(|a, b| b.total_time_loss_s.total_cmp(&a.total_time_loss_s));
        most_costly.truncate(5);

        let total_mistakes = self.events.len();
        let total_time_lost = self.total_time_lost();

        // Score starts at 1 and is reduced by mistake count and cost.
        let mistake_penalty = (total_mistakes as f64 * 0.1).min(0.5);
        let time_penalty = (total_time_lost / 10.0).min(0.3);
        let session_score = (1.0 - mistake_penalty - time_penalty).max(0.0);

        SessionSummary {
            session_id: self.session_id.clone(),
            session_start: self.session_start,
            session_end: now,
            total_mistakes,
            total_time_lost_s: total_time_lost,
            improvement_areas: self.improvement_areas(&persistent),
            recommendations: self.recommendations(&persistent, session_score),
            most_common,
            most_costly,
            session_score,
        }
    }

    fn improvement_areas(&self, persistent: &[MistakePattern]) -> Vec<String> {
        let mut areas = Vec::new();

        let mut by_kind: BTreeMap<MistakeKind, (u32, f64)> = BTreeMap::new();
        for p in persistent {
            let entry = by_kind.entry(p.kind).or_insert((0, 0.0));
            entry.0 += p.frequency;
            entry.1 += p.total_time_loss_s;
        }
        for (kind, (freq, lost)) in &by_kind {
            if *freq >= 3 || *lost >= 1.0 {
                areas.push(format!("{} ({freq} times, {lost:.1}s lost)", kind.description()));
            }
        }

        let mut by_corner: BTreeMap<&str, f64> = BTreeMap::new();
        for p in persistent {
            *by_corner.entry(p.corner_name.as_str()).or_default() += p.total_time_loss_s;
        }
        for (corner, lost) in &by_corner {
            if *lost >= 0.5 {
                areas.push(format!("{corner} ({lost:.1}s lost)"));
            }
        }

        areas.truncate(5);
        areas
    }

    fn recommendations(&self, persistent: &[MistakePattern], score: f64) -> Vec<String> {
        let mut recs = Vec::new();

        if score < 0.5 {
            recs.push("Focus on consistency - reduce mistake frequency".to_string());
        }

        if let Some(critical) = persistent.iter().find(|p| p.priority == MessagePriority::Critical)
        {
            recs.push(format!(
                "Priority: fix {} at {} ({} times, {:.1}s lost)",
                critical.kind.description(),
                critical.corner_name,
                critical.frequency,
                critical.total_time_loss_s
            ));
        }

        if let Some(costly) = persistent
            .iter()
            .max_by(|a, b| a.total_time_loss_s.total_cmp(&b.total_time_loss_s))
        {
            if costly.total_time_loss_s >= 1.0 {
                recs.push(format!(
                    "Biggest time loss: {} - {:.1}s total",
                    costly.corner_name, costly.total_time_loss_s
                ));
            }
        }

        let improving = persistent.iter().filter(|p| p.trend == Trend::Improving).count();
        if improving > 0 {
            recs.push(format!("Good progress: {improving} areas improving"));
        }
        let declining = persistent.iter().filter(|p| p.trend == Trend::Declining).count();
        if declining > 0 {
            recs.push(format!("Watch out: {declining} areas getting worse"));
        }

        recs
    }
}

/// Ordered classification: timing errors, then speed errors, then technique
/// patterns, then line patterns, then a time-loss default.
fn classify(analysis: &MicroAnalysis) -> MistakeKind {
    if analysis.brake_timing_delta_s.abs() > 0.05 {
        return if analysis.brake_timing_delta_s > 0.0 {
            MistakeKind::LateBrake
        } else {
            MistakeKind::EarlyBrake
        };
    }
    if analysis.throttle_timing_delta_s.abs() > 0.05 {
        return if analysis.throttle_timing_delta_s > 0.0 {
            MistakeKind::EarlyThrottle
        } else {
            MistakeKind::LateThrottle
        };
    }

    if analysis.apex_speed_delta_kph.abs() > 3.0 {
        return if analysis.apex_speed_delta_kph < 0.0 {
            MistakeKind::LowApexSpeed
        } else {
            MistakeKind::HighApexSpeed
        };
    }
    if analysis.entry_speed_delta_kph.abs() > 5.0 {
        return if analysis.entry_speed_delta_kph < 0.0 {
            MistakeKind::LowEntrySpeed
        } else {
            MistakeKind::HighEntrySpeed
        };
    }
    if analysis.exit_speed_delta_kph.abs() > 3.0 {
        return if analysis.exit_speed_delta_kph < 0.0 {
            MistakeKind::LowExitSpeed
        } else {
            MistakeKind::HighExitSpeed
        };
    }

    if analysis.has_pattern(MicroPattern::Understeer)
        || analysis.has_pattern(MicroPattern::HighSpeedUndersteer)
    {
        return MistakeKind::Understeer;
    }
    if analysis.has_pattern(MicroPattern::OffThrottleOversteer) {
        return MistakeKind::OffThrottleOversteer;
    }
    if analysis.has_pattern(MicroPattern::InconsistentInputs) {
        return MistakeKind::InconsistentInputs;
    }

    if analysis.has_pattern(MicroPattern::EarlyApex) {
        return MistakeKind::EarlyApex;
    }
    if analysis.has_pattern(MicroPattern::LateApex) {
        return MistakeKind::LateApex;
    }

    if analysis.total_time_loss_s > 0.2 {
        return MistakeKind::PoorRacingLine;
    }
    MistakeKind::General
}

/// Priority from the frequency / average-loss table.
fn priority_for(frequency: u32, avg_time_loss: f64) -> MessagePriority {
    if frequency >= 5 && avg_time_loss >= 0.30 {
        MessagePriority::Critical
    } else if frequency >= 3 && avg_time_loss >= 0.20 {
        MessagePriority::High
    } else if frequency >= 2 && avg_time_loss >= 0.10 {
        MessagePriority::Medium
    } else {
        MessagePriority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::TimeLossBreakdown;

    fn analysis(corner: &str, brake_delta: f64, loss: f64) -> MicroAnalysis {
        MicroAnalysis {
            corner_id: corner.to_string(),
            corner_name: corner.to_uppercase(),
            brake_timing_delta_s: brake_delta,
            throttle_timing_delta_s: 0.0,
            entry_speed_delta_kph: 0.0,
            apex_speed_delta_kph: 0.0,
            exit_speed_delta_kph: 0.0,
            brake_pressure_delta: 0.0,
            throttle_pressure_delta: 0.0,
            steering_angle_delta_deg: 0.0,
            racing_line_deviation: 0.0,
            line_smoothness: 0.9,
            total_time_loss_s: loss,
            loss_breakdown: TimeLossBreakdown::default(),
            patterns: Vec::new(),
            feedback: Vec::new(),
            priority: MessagePriority::Medium,
        }
    }

    #[test]
    fn tiny_losses_are_not_tracked() {
        let mut tracker = MistakeTracker::new(MistakeConfig::default(), "s".into(), 0.0);
        assert!(tracker.record(&analysis("t1", 0.1, 0.03), 10.0).is_none());
        assert_eq!(tracker.event_count(), 0);
    }

    #[test]
    fn late_brake_classified_and_aggregated() {
        let mut tracker = MistakeTracker::new(MistakeConfig::default(), "s".into(), 0.0);
        for i in 0..3 {
            let event = tracker
                .record(&analysis("t1", 0.1, 0.25), 10.0 + i as f64)
                .expect("tracked");
            assert_eq!(event.kind, MistakeKind::LateBrake);
        }
        let patterns = tracker.persistent_patterns(2);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 3);
        assert!((patterns[0].total_time_loss_s - 0.75).abs() < 1e-9);
        // 3 occurrences at 0.25s average: high.
        assert_eq!(patterns[0].priority, MessagePriority::High);
    }

    #[test]
    fn priority_table_bands() {
        assert_eq!(priority_for(5, 0.35), MessagePriority::Critical);
        assert_eq!(priority_for(3, 0.22), MessagePriority::High);
        assert_eq!(priority_for(2, 0.12), MessagePriority::Medium);
        assert_eq!(priority_for(1, 0.5), MessagePriority::Low);
        assert_eq!(priority_for(10, 0.05), MessagePriority::Low);
    }

    #[test]
    fn trend_needs_four_events_then_compares_halves() {
        let mut tracker = MistakeTracker::new(MistakeConfig::default(), "s".into(), 0.0);
        // Two big losses then two small ones: improving.
        for (i, loss) in [0.4, 0.4, 0.1, 0.1].iter().enumerate() {
            tracker.record(&analysis("t2", 0.1, *loss), 10.0 + i as f64);
        }
        let pattern = tracker.persistent_patterns(2).remove(0);
        assert_eq!(pattern.trend, Trend::Improving);
    }

    #[test]
    fn session_summary_scores_and_recommends() {
        let mut tracker = MistakeTracker::new(MistakeConfig::default(), "race1".into(), 0.0);
        for i in 0..6 {
            tracker.record(&analysis("t3", 0.1, 0.35), 10.0 + i as f64);
        }
        let summary = tracker.session_summary(600.0);
        assert_eq!(summary.total_mistakes, 6);
        assert!((summary.total_time_lost_s - 2.1).abs() < 1e-9);
        // 1.0 - min(0.5, 0.6) - min(0.3, 0.21) = 1.0 - 0.5 - 0.21
        assert!((summary.session_score - 0.29).abs() < 1e-9);
        assert!(!summary.most_common.is_empty());
        assert!(!summary.most_costly.is_empty());
        assert!(summary
            .recommendations
            .iter()
            .any(|r| r.contains("Priority: fix")));
    }
}
