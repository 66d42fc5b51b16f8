//! Coaching decider
//!
//! Maps insights and micro-analyses onto coaching messages: fixed
//! situation→category table, importance→priority mapping, a local template
//! library with rotating variants, and the gating rule that decides when a
//! message is worth a remote LLM rewrite.

use orc_core::config::LlmConfig;
use orc_core::model::{
    CoachingMessage, MessageCategory, MessagePriority, MessageSource, MicroAnalysis,
    PatternInsight, Situation,
};
use std::collections::HashMap;

/// What to do with a drafted message.
pub enum Decision {
    /// Enqueue the local rendering directly.
    Deliver(CoachingMessage),
    /// Hand to the enrichment task; `fallback` is delivered unchanged if
    /// the remote path fails in any way.
    Enrich { fallback: CoachingMessage, insight: PatternInsight },
}

pub struct CoachingDecider {
    llm: LlmConfig,
    /// Rotation counters per situation so template variants cycle.
    variant_counters: HashMap<Situation, usize>,
}

impl CoachingDecider {
    pub fn new(llm: LlmConfig) -> Self {
        Self { llm, variant_counters: HashMap::new() }
    }

    /// Fixed situation→category table.
    pub fn categorize(situation: Situation) -> MessageCategory {
        use Situation::*;
        match situation {
            Understeer | PowerUndersteer | HighSpeedUndersteer | Oversteer | PowerOversteer
            | TrailBrakeOversteer => MessageCategory::Handling,
            InsufficientBraking | LateBraking | InputOverlap | TrailBraking | OffUnderBraking => {
                MessageCategory::Braking
            }
            ShiftEarly | ShiftLate | PoorRevMatching | MissedEngineBraking | GearTooHigh
            | GearTooLow => MessageCategory::GearShifting,
            HighGWarning | RoughGTransitions => MessageCategory::GForces,
            UnderusedGrip => MessageCategory::WeightTransfer,
            InconsistentLapTimes => MessageCategory::Consistency,
            ExcellentConsistency | PersonalBestCorner => MessageCategory::Positive,
            OffUnderPower => MessageCategory::Throttle,
            OffMidcorner | TrackLimitsPattern => MessageCategory::RacingLine,
            CornerAnalysis => MessageCategory::Cornering,
            SectorAnalysis | RaceStrategy => MessageCategory::Session,
            TechniqueImprovement => MessageCategory::Tip,
            BaselineProgress | BaselineEstablished => MessageCategory::Baseline,
            General => MessageCategory::General,
        }
    }

    /// Documented gating rule: certain situations always go remote; other
    /// insights only when local confidence is low but the matter is
    /// important.
    pub fn should_escalate(&self, situation: Situation, confidence: f64, importance: f64) -> bool {
        if !self.llm.enabled {
            return false;
        }
        if matches!(
            situation,
            Situation::CornerAnalysis | Situation::RaceStrategy | Situation::TechniqueImprovement
        ) {
            return true;
        }
        confidence < self.llm.escalate_below_confidence
            && importance > self.llm.escalate_above_importance
    }

    /// Draft a message for a detector insight and decide its path.
    pub fn decide(&mut self, insight: &PatternInsight, now: f64) -> Decision {
        let category = Self::categorize(insight.situation);
        let priority = MessagePriority::from_importance(insight.importance);

        let mut content = self.render(insight);
        if let Some(reference) = &insight.reference {
            if reference.delta_s > 0.05 {
                content.push_str(&format!(
                    " You are {:.2}s off your {}.",
                    reference.delta_s,
                    reference.kind.as_str().replace('_', " ")
                ));
            }
        }

        let mut message = CoachingMessage::new(
            content,
            category,
            priority,
            MessageSource::Local,
            insight.confidence,
            insight.situation.key(),
            now,
        );
        if insight.improvement_potential_s > 0.0 {
            message.improvement_potential_s = Some(insight.improvement_potential_s);
        }

        if self.should_escalate(insight.situation, insight.confidence, insight.importance) {
            Decision::Enrich { fallback: message, insight: insight.clone() }
        } else {
            Decision::Deliver(message)
        }
    }

    /// Draft the corner-analysis message for a completed micro-analysis.
    /// Always eligible for enrichment per the gating table.
    pub fn decide_micro(&mut self, analysis: &MicroAnalysis, now: f64) -> Decision {
        let content = if analysis.feedback.is_empty() {
            format!("{}: clean corner, keep it up", analysis.corner_name)
        } else {
            let highlights: Vec<&str> =
                analysis.feedback.iter().take(2).map(String::as_str).collect();
            format!("{}: {}", analysis.corner_name, highlights.join("; "))
        };

        let mut message = CoachingMessage::new(
            content,
            MessageCategory::Cornering,
            analysis.priority,
            MessageSource::Local,
            0.85,
            Situation::CornerAnalysis.key(),
            now,
        );
        if analysis.total_time_loss_s > 0.0 {
            message.improvement_potential_s = Some(analysis.total_time_loss_s);
        }

        // Only escalate corners that actually cost time; clean corners are
        // not worth a remote call.
        let worth_remote = analysis.total_time_loss_s > 0.1;
        if self.llm.enabled && worth_remote {
            let insight = PatternInsight {
                situation: Situation::CornerAnalysis,
                confidence: 0.85,
                importance: match analysis.priority {
                    MessagePriority::Critical => 0.95,
                    MessagePriority::High => 0.8,
                    MessagePriority::Medium => 0.6,
                    MessagePriority::Low => 0.3,
                },
                corner_id: Some(analysis.corner_id.clone()),
                description: message.content.clone(),
                reference: None,
                improvement_potential_s: analysis.total_time_loss_s,
            };
            Decision::Enrich { fallback: message, insight }
        } else {
            Decision::Deliver(message)
        }
    }

    /// Render the local text for an insight: template variants where the
    /// library has them, the detector's own description otherwise.
    fn render(&mut self, insight: &PatternInsight) -> String {
        let Some(variants) = template_variants(insight.situation) else {
            return insight.description.clone();
        };
        let counter = self.variant_counters.entry(insight.situation).or_insert(0);
        let text = variants[*counter % variants.len()];
        *counter += 1;
        text.to_string()
    }
}

/// Template variants for situations where repeated identical wording would
/// be filtered as duplicates.
fn template_variants(situation: Situation) -> Option<&'static [&'static str]> {
    match situation {
        Situation::InsufficientBraking => Some(&[
            "Try more brake pressure - you're not using the car's full stopping power.",
            "You can brake harder - use more of the pedal travel.",
            "Increase brake pressure to shorten your braking zones.",
        ]),
        Situation::InconsistentLapTimes => Some(&[
            "Focus on consistency - aim for repeatable lap times.",
            "Hit the same marks every lap for better consistency.",
            "Smooth inputs lead to consistent lap times.",
        ]),
        Situation::Understeer => Some(&[
            "Understeer detected - slow down more before turn-in.",
            "The front is washing out - reduce entry speed or steering angle.",
            "Understeer: let the car rotate before adding throttle.",
        ]),
        Situation::Oversteer => Some(&[
            "Watch the oversteer - smoother steering corrections will help.",
            "The rear is stepping out - unwind steering more gently.",
            "Oversteer: balance the car with smoother inputs.",
        ]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orc_core::model::ReferenceContext;
    use orc_core::model::ReferenceKind;

    fn insight(situation: Situation, confidence: f64, importance: f64) -> PatternInsight {
        PatternInsight {
            situation,
            confidence,
            importance,
            corner_id: None,
            description: "detector text".to_string(),
            reference: None,
            improvement_potential_s: 0.1,
        }
    }

    fn decider(enabled: bool) -> CoachingDecider {
        let mut llm = LlmConfig::default();
        llm.enabled = enabled;
        CoachingDecider::new(llm)
    }

    #[test]
    fn category_table_spot_checks() {
        assert_eq!(CoachingDecider::categorize(Situation::Understeer), MessageCategory::Handling);
        assert_eq!(
            CoachingDecider::categorize(Situation::OffUnderBraking),
            MessageCategory::Braking
        );
        assert_eq!(
            CoachingDecider::categorize(Situation::OffMidcorner),
            MessageCategory::RacingLine
        );
        assert_eq!(
            CoachingDecider::categorize(Situation::ShiftLate),
            MessageCategory::GearShifting
        );
        assert_eq!(
            CoachingDecider::categorize(Situation::BaselineProgress),
            MessageCategory::Baseline
        );
    }

    #[test]
    fn gating_rule_matches_documented_behavior() {
        let d = decider(true);
        // Always-remote situations.
        assert!(d.should_escalate(Situation::CornerAnalysis, 0.95, 0.2));
        assert!(d.should_escalate(Situation::RaceStrategy, 0.95, 0.2));
        // Low confidence + high importance.
        assert!(d.should_escalate(Situation::Understeer, 0.5, 0.8));
        // Confident local handling stays local.
        assert!(!d.should_escalate(Situation::Understeer, 0.85, 0.8));
        assert!(!d.should_escalate(Situation::Understeer, 0.5, 0.5));
        // Disabled LLM never escalates.
        assert!(!decider(false).should_escalate(Situation::CornerAnalysis, 0.1, 1.0));
    }

    #[test]
    fn priority_maps_from_importance() {
        let mut d = decider(false);
        match d.decide(&insight(Situation::Oversteer, 0.9, 0.95), 0.0) {
            Decision::Deliver(m) => assert_eq!(m.priority, MessagePriority::Critical),
            _ => panic!("expected local delivery"),
        }
        match d.decide(&insight(Situation::Oversteer, 0.9, 0.5), 1.0) {
            Decision::Deliver(m) => assert_eq!(m.priority, MessagePriority::Medium),
            _ => panic!("expected local delivery"),
        }
    }

    #[test]
    fn template_variants_rotate() {
        let mut d = decider(false);
        let texts: Vec<String> = (0..3)
            .map(|i| match d.decide(&insight(Situation::Understeer, 0.85, 0.6), i as f64) {
                Decision::Deliver(m) => m.content,
                _ => panic!("expected local"),
            })
            .collect();
        assert_ne!(texts[0], texts[1]);
        assert_ne!(texts[1], texts[2]);
    }

    #[test]
    fn reference_delta_appended() {
        let mut d = decider(false);
        let mut i = insight(Situation::LateBraking, 0.8, 0.6);
        i.reference = Some(ReferenceContext {
            kind: ReferenceKind::PersonalBest,
            delta_s: 0.42,
            improvement_potential_s: 0.42,
        });
        match d.decide(&i, 0.0) {
            Decision::Deliver(m) => {
                assert!(m.content.contains("0.42s"), "content: {}", m.content);
                assert!(m.content.contains("personal best"));
            }
            _ => panic!("expected local"),
        }
    }

    #[test]
    fn micro_analysis_escalates_only_when_costly() {
        use orc_core::model::TimeLossBreakdown;
        let analysis = |loss: f64| MicroAnalysis {
            corner_id: "t5".into(),
            corner_name: "Turn 5".into(),
            brake_timing_delta_s: 0.05,
            throttle_timing_delta_s: 0.0,
            entry_speed_delta_kph: 0.0,
            apex_speed_delta_kph: -5.0,
            exit_speed_delta_kph: -2.0,
            brake_pressure_delta: 0.0,
            throttle_pressure_delta: 0.0,
            steering_angle_delta_deg: 0.0,
            racing_line_deviation: 0.0,
            line_smoothness: 0.9,
            total_time_loss_s: loss,
            loss_breakdown: TimeLossBreakdown::default(),
            patterns: Vec::new(),
            feedback: vec!["Braked 0.05s too late".into(), "Apex speed down 5.0 km/h".into()],
            priority: MessagePriority::Medium,
        };

        let mut d = decider(true);
        assert!(matches!(d.decide_micro(&analysis(0.3), 0.0), Decision::Enrich { .. }));
        assert!(matches!(d.decide_micro(&analysis(0.02), 0.0), Decision::Deliver(_)));

        let mut d_off = decider(false);
        assert!(matches!(d_off.decide_micro(&analysis(0.3), 0.0), Decision::Deliver(_)));
    }
}
