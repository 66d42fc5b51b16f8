//! Unified coaching data model
//!
//! Defines the `TelemetrySample` every source normalizes into, plus all of
//! the records the pipeline produces from it: laps, sectors, track segments,
//! reference data, detector insights, corner micro-analyses, mistakes and
//! coaching messages.
//!
//! Unit conventions: timestamps are monotonic seconds (f64) unless a field
//! is documented as epoch seconds; speeds are m/s internally; reference
//! speeds and speed deltas are km/h because they are user-facing figures;
//! pedals are fractions in [0, 1]; angles are radians.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// === Telemetry ===

/// Where the car is relative to the track surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSurface {
    NotInWorld,
    OffTrack,
    InPitStall,
    ApproachingPits,
    OnTrack,
}

/// Simulator session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Invalid,
    GetInCar,
    Warmup,
    Parade,
    Racing,
    Checkered,
    Cooldown,
}

/// A single normalized telemetry sample (~60 Hz).
///
/// Wheel-indexed arrays are ordered FL, FR, RL, RR.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Monotonic timestamp in seconds.
    pub timestamp: f64,
    /// Current lap number as reported by the sim.
    pub lap: u32,
    /// Lap-distance fraction in [0, 1); wraps at 1.0.
    pub lap_dist_pct: f64,
    /// Speed in m/s.
    pub speed_mps: f64,
    /// Engine speed.
    pub rpm: f64,
    /// Current gear; 0 = neutral, negative = reverse.
    pub gear: i8,
    /// Throttle pedal in [0, 1].
    pub throttle: f64,
    /// Brake pedal in [0, 1].
    pub brake: f64,
    /// Steering wheel angle in radians, positive = right.
    pub steering_rad: f64,
    /// Yaw rate in rad/s.
    pub yaw_rate_rps: f64,
    /// Lateral acceleration in g.
    pub lat_accel_g: f64,
    /// Longitudinal acceleration in g; positive = accelerating.
    pub long_accel_g: f64,
    /// Vertical acceleration in g.
    pub vert_accel_g: f64,
    /// Velocity along the car's forward axis, m/s.
    pub velocity_x_mps: f64,
    /// Velocity along the car's lateral axis, m/s.
    pub velocity_y_mps: f64,
    /// Tire pressures in kPa (FL, FR, RL, RR).
    pub tire_pressures_kpa: [f64; 4],
    /// Tire surface temperatures in °C, when the sim reports them.
    pub tire_temps_c: Option<[f64; 4]>,
    /// Fuel remaining in litres.
    pub fuel_level_l: f64,
    /// Fuel consumption rate in litres/hour.
    pub fuel_use_per_hour_l: f64,
    /// True while on pit road.
    pub on_pit_road: bool,
    pub track_surface: TrackSurface,
    pub session_phase: SessionPhase,
    /// Raw session flag bits as reported by the sim.
    pub session_flags: u32,
    /// Lap time of the previous lap, if the sim reports one (> 0).
    pub last_lap_time_s: Option<f64>,
    /// Running time of the current lap.
    pub current_lap_time_s: Option<f64>,
    pub track_name: Option<String>,
    pub car_name: Option<String>,
}

impl TelemetrySample {
    /// Slip angle approximation from the velocity components.
    pub fn slip_angle(&self) -> f64 {
        if self.velocity_x_mps.abs() > 0.1 {
            (self.velocity_y_mps / self.velocity_x_mps).abs()
        } else {
            0.0
        }
    }

    /// Combined lateral + longitudinal g.
    pub fn combined_g(&self) -> f64 {
        (self.lat_accel_g.powi(2) + self.long_accel_g.powi(2)).sqrt()
    }
}

// === Laps and sectors ===

/// Bookkeeping attached to a completed lap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LapMetadata {
    pub sector_boundaries: Vec<f64>,
    pub sample_count: usize,
}

/// A completed lap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LapRecord {
    pub lap_number: u32,
    /// Lap time in seconds, always > 0 for a produced record.
    pub lap_time_s: f64,
    /// Exactly three entries, zero-padded when a trailing sector is missing.
    pub sector_times_s: Vec<f64>,
    /// Telemetry captured during the lap. Bounded by the lap itself; may be
    /// empty when a record is reloaded from persistence.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<TelemetrySample>,
    pub track_name: String,
    pub car_name: String,
    /// Epoch seconds at completion.
    pub completed_at: f64,
    pub is_valid: bool,
    pub metadata: LapMetadata,
}

/// Aggregate metrics for one traversal of a sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorRecord {
    /// 0-based sector index.
    pub sector: usize,
    pub sector_time_s: f64,
    pub start_pct: f64,
    pub end_pct: f64,
    pub entry_speed_mps: f64,
    pub exit_speed_mps: f64,
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    pub avg_throttle: f64,
    pub avg_brake: f64,
    pub max_steering_rad: f64,
}

// === Track segments ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Corner,
    Straight,
    Chicane,
}

/// A named slice of the lap. Segment spans are disjoint, sorted, and cover
/// exactly [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSegment {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    pub start_pct: f64,
    pub end_pct: f64,
    pub description: String,
}

impl TrackSegment {
    /// The catch-all segment used when no track metadata is available.
    pub fn whole_track() -> Self {
        Self {
            id: "track".to_string(),
            name: "Full lap".to_string(),
            kind: SegmentKind::Straight,
            start_pct: 0.0,
            end_pct: 1.0,
            description: "Whole track (no segment metadata)".to_string(),
        }
    }

    pub fn contains(&self, pct: f64) -> bool {
        self.start_pct <= pct && pct < self.end_pct
    }
}

// === References ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerSpeedClass {
    Slow,
    Medium,
    HighSpeed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CornerDifficulty {
    Easy,
    Medium,
    Hard,
}

/// Reference data for a single corner, derived from the best lap's slice
/// through it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CornerReference {
    pub corner_id: String,
    pub corner_name: String,
    pub track_name: String,
    pub car_name: String,
    pub position_start: f64,
    pub position_end: f64,
    /// Lap-distance fraction where braking should start.
    pub brake_point_pct: f64,
    /// Peak brake pressure through the corner, [0, 1].
    pub brake_pressure: f64,
    /// Speeds in km/h.
    pub entry_speed_kph: f64,
    pub apex_speed_kph: f64,
    pub exit_speed_kph: f64,
    /// Lap-distance fraction where throttle should be applied.
    pub throttle_point_pct: f64,
    pub throttle_pressure: f64,
    /// Peak steering magnitude in radians.
    pub steering_rad: f64,
    /// Ordered (lap fraction, steering) pairs describing the line.
    pub racing_line: Vec<(f64, f64)>,
    pub corner_time_s: f64,
    pub gear: i8,
    pub speed_class: CornerSpeedClass,
    pub difficulty: CornerDifficulty,
    #[serde(default)]
    pub notes: String,
}

/// Which benchmark a reference lap represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    PersonalBest,
    SessionBest,
    Engineer,
    Optimal,
    RacePace,
    Consistency,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PersonalBest => "personal_best",
            Self::SessionBest => "session_best",
            Self::Engineer => "engineer",
            Self::Optimal => "optimal",
            Self::RacePace => "race_pace",
            Self::Consistency => "consistency",
        }
    }
}

/// Target inputs derived from a reference segment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimalInputs {
    pub entry_speed_mps: f64,
    pub exit_speed_mps: f64,
    pub throttle_application: f64,
    pub brake_release: f64,
}

/// Per-segment slice of a reference lap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceSegment {
    pub segment_id: String,
    pub segment_name: String,
    pub start_pct: f64,
    pub end_pct: f64,
    pub segment_time_s: f64,
    pub entry_speed_mps: f64,
    pub exit_speed_mps: f64,
    pub min_speed_mps: f64,
    pub max_speed_mps: f64,
    pub avg_throttle: f64,
    pub avg_brake: f64,
    pub max_steering_rad: f64,
    /// 0-1, higher is smoother.
    pub racing_line_score: f64,
    pub optimal_inputs: OptimalInputs,
}

/// A stored benchmark lap for a (track, car) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceLap {
    pub track_name: String,
    pub car_name: String,
    pub lap_time_s: f64,
    pub kind: ReferenceKind,
    /// Epoch seconds.
    pub created_at: f64,
    pub segments: BTreeMap<String, ReferenceSegment>,
    #[serde(default)]
    pub sample_count: usize,
}

/// Reference comparison attached to an insight when a benchmark exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceContext {
    pub kind: ReferenceKind,
    /// Positive = slower than the reference.
    pub delta_s: f64,
    pub improvement_potential_s: f64,
}

// === Detector insights ===

/// Closed set of situations the detectors and analyzers can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    Understeer,
    PowerUndersteer,
    HighSpeedUndersteer,
    Oversteer,
    PowerOversteer,
    TrailBrakeOversteer,
    InsufficientBraking,
    LateBraking,
    InputOverlap,
    TrailBraking,
    ShiftEarly,
    ShiftLate,
    PoorRevMatching,
    MissedEngineBraking,
    GearTooHigh,
    GearTooLow,
    HighGWarning,
    RoughGTransitions,
    UnderusedGrip,
    InconsistentLapTimes,
    ExcellentConsistency,
    OffUnderBraking,
    OffUnderPower,
    OffMidcorner,
    TrackLimitsPattern,
    CornerAnalysis,
    SectorAnalysis,
    RaceStrategy,
    TechniqueImprovement,
    BaselineProgress,
    BaselineEstablished,
    PersonalBestCorner,
    General,
}

impl Situation {
    pub fn key(&self) -> &'static str {
        match self {
            Self::Understeer => "understeer",
            Self::PowerUndersteer => "power_understeer",
            Self::HighSpeedUndersteer => "high_speed_understeer",
            Self::Oversteer => "oversteer",
            Self::PowerOversteer => "power_oversteer",
            Self::TrailBrakeOversteer => "trail_brake_oversteer",
            Self::InsufficientBraking => "insufficient_braking",
            Self::LateBraking => "late_braking",
            Self::InputOverlap => "input_overlap",
            Self::TrailBraking => "trail_braking",
            Self::ShiftEarly => "shift_early",
            Self::ShiftLate => "shift_late",
            Self::PoorRevMatching => "poor_rev_matching",
            Self::MissedEngineBraking => "missed_engine_braking",
            Self::GearTooHigh => "gear_too_high",
            Self::GearTooLow => "gear_too_low",
            Self::HighGWarning => "high_g_warning",
            Self::RoughGTransitions => "rough_g_transitions",
            Self::UnderusedGrip => "underused_grip",
            Self::InconsistentLapTimes => "inconsistent_lap_times",
            Self::ExcellentConsistency => "excellent_consistency",
            Self::OffUnderBraking => "off_under_braking",
            Self::OffUnderPower => "off_under_power",
            Self::OffMidcorner => "off_midcorner",
            Self::TrackLimitsPattern => "track_limits_pattern",
            Self::CornerAnalysis => "corner_analysis",
            Self::SectorAnalysis => "sector_analysis",
            Self::RaceStrategy => "race_strategy",
            Self::TechniqueImprovement => "technique_improvement",
            Self::BaselineProgress => "baseline_progress",
            Self::BaselineEstablished => "baseline_established",
            Self::PersonalBestCorner => "personal_best_corner",
            Self::General => "general",
        }
    }
}

/// Output of a pattern detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternInsight {
    pub situation: Situation,
    /// Detector confidence, [0, 1].
    pub confidence: f64,
    /// How much the driver should care, [0, 1].
    pub importance: f64,
    pub corner_id: Option<String>,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<ReferenceContext>,
    /// Estimated time recoverable by fixing this, seconds.
    #[serde(default)]
    pub improvement_potential_s: f64,
}

// === Micro analysis ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicroPattern {
    LateApex,
    EarlyApex,
    OffThrottleOversteer,
    Understeer,
    HighSpeedUndersteer,
    TrailBraking,
    EarlyThrottle,
    LateThrottle,
    InconsistentInputs,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedPattern {
    pub pattern: MicroPattern,
    pub confidence: f64,
}

/// Per-factor breakdown of the corner time loss, seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeLossBreakdown {
    pub brake_timing: f64,
    pub throttle_timing: f64,
    pub entry_speed: f64,
    pub apex_speed: f64,
    pub exit_speed: f64,
}

/// Detailed analysis of one corner traversal against its reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroAnalysis {
    pub corner_id: String,
    pub corner_name: String,
    /// Seconds; positive = late.
    pub brake_timing_delta_s: f64,
    /// Seconds; positive = early.
    pub throttle_timing_delta_s: f64,
    /// km/h; positive = faster than the reference.
    pub entry_speed_delta_kph: f64,
    pub apex_speed_delta_kph: f64,
    pub exit_speed_delta_kph: f64,
    /// Peak pressure deltas as fractions of full travel.
    pub brake_pressure_delta: f64,
    pub throttle_pressure_delta: f64,
    /// Degrees.
    pub steering_angle_delta_deg: f64,
    pub racing_line_deviation: f64,
    /// 0-1, higher is smoother.
    pub line_smoothness: f64,
    pub total_time_loss_s: f64,
    pub loss_breakdown: TimeLossBreakdown,
    pub patterns: Vec<DetectedPattern>,
    pub feedback: Vec<String>,
    pub priority: MessagePriority,
}

impl MicroAnalysis {
    pub fn has_pattern(&self, pattern: MicroPattern) -> bool {
        self.patterns.iter().any(|p| p.pattern == pattern)
    }
}

// === Mistakes ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MistakeKind {
    LateBrake,
    EarlyBrake,
    LateThrottle,
    EarlyThrottle,
    LowEntrySpeed,
    HighEntrySpeed,
    LowApexSpeed,
    HighApexSpeed,
    LowExitSpeed,
    HighExitSpeed,
    Understeer,
    Oversteer,
    OffThrottleOversteer,
    InconsistentInputs,
    EarlyApex,
    LateApex,
    PoorRacingLine,
    General,
}

impl MistakeKind {
    pub fn description(&self) -> &'static str {
        match self {
            Self::LateBrake => "Braking too late",
            Self::EarlyBrake => "Braking too early",
            Self::LateThrottle => "Throttle too late",
            Self::EarlyThrottle => "Throttle too early",
            Self::LowEntrySpeed => "Entry speed too low",
            Self::HighEntrySpeed => "Entry speed too high",
            Self::LowApexSpeed => "Apex speed too low",
            Self::HighApexSpeed => "Apex speed too high",
            Self::LowExitSpeed => "Exit speed too low",
            Self::HighExitSpeed => "Exit speed too high",
            Self::Understeer => "Understeer",
            Self::Oversteer => "Oversteer",
            Self::OffThrottleOversteer => "Off-throttle oversteer",
            Self::InconsistentInputs => "Inconsistent inputs",
            Self::EarlyApex => "Apex too early",
            Self::LateApex => "Apex too late",
            Self::PoorRacingLine => "Poor racing line",
            Self::General => "General mistake",
        }
    }
}

/// A single recorded mistake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistakeEvent {
    pub kind: MistakeKind,
    pub corner_id: String,
    pub corner_name: String,
    pub timestamp: f64,
    /// 0-1, how bad it was.
    pub severity: f64,
    pub time_loss_s: f64,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Aggregate of recurring mistakes at one (kind, corner).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MistakePattern {
    pub kind: MistakeKind,
    pub corner_id: String,
    pub corner_name: String,
    pub frequency: u32,
    pub total_time_loss_s: f64,
    pub avg_time_loss_s: f64,
    pub first_occurrence: f64,
    pub last_occurrence: f64,
    /// Occurrences in the trailing 10-minute window.
    pub recent_frequency: u32,
    pub trend: Trend,
    pub priority: MessagePriority,
    pub description: String,
}

/// End-of-session rollup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub session_start: f64,
    pub session_end: f64,
    pub total_mistakes: usize,
    pub total_time_lost_s: f64,
    pub most_common: Vec<MistakePattern>,
    pub most_costly: Vec<MistakePattern>,
    pub improvement_areas: Vec<String>,
    /// 0-1, higher is better.
    pub session_score: f64,
    pub recommendations: Vec<String>,
}

// === Coaching messages ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageCategory {
    Braking,
    Throttle,
    Cornering,
    Consistency,
    RacingLine,
    Handling,
    GearShifting,
    WeightTransfer,
    GForces,
    Positive,
    Tip,
    Session,
    Baseline,
    General,
}

impl MessageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Braking => "braking",
            Self::Throttle => "throttle",
            Self::Cornering => "cornering",
            Self::Consistency => "consistency",
            Self::RacingLine => "racing-line",
            Self::Handling => "handling",
            Self::GearShifting => "gear-shifting",
            Self::WeightTransfer => "weight-transfer",
            Self::GForces => "g-forces",
            Self::Positive => "positive",
            Self::Tip => "tip",
            Self::Session => "session",
            Self::Baseline => "baseline",
            Self::General => "general",
        }
    }
}

/// Message priority; 1 is most urgent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Critical,
    High,
    Medium,
    Low,
}

impl MessagePriority {
    /// Wire encoding: 1 = critical .. 4 = low.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 1,
            Self::High => 2,
            Self::Medium => 3,
            Self::Low => 4,
        }
    }

    /// Map an importance score in [0, 1] onto a priority.
    pub fn from_importance(importance: f64) -> Self {
        if importance > 0.9 {
            Self::Critical
        } else if importance > 0.7 {
            Self::High
        } else if importance > 0.4 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    Local,
    Remote,
    Combined,
    Reference,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Combined => "combined",
            Self::Reference => "reference",
        }
    }
}

/// A coaching message flowing through the queue toward delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingMessage {
    pub content: String,
    pub category: MessageCategory,
    pub priority: MessagePriority,
    pub source: MessageSource,
    /// [0, 1].
    pub confidence: f64,
    /// Free-form origin tag, e.g. the situation key.
    pub context: String,
    /// Monotonic seconds at creation.
    pub timestamp: f64,
    /// Base64 audio, when a TTS backend produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub attempts: u32,
    /// Estimated seconds recoverable, surfaced to the UI when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improvement_potential_s: Option<f64>,
}

impl CoachingMessage {
    pub fn new(
        content: impl Into<String>,
        category: MessageCategory,
        priority: MessagePriority,
        source: MessageSource,
        confidence: f64,
        context: impl Into<String>,
        timestamp: f64,
    ) -> Self {
        Self {
            content: content.into(),
            category,
            priority,
            source,
            confidence,
            context: context.into(),
            timestamp,
            audio: None,
            delivered: false,
            attempts: 0,
            improvement_potential_s: None,
        }
    }
}

// === Session aggregate ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrivingStyle {
    Unknown,
    Consistent,
    Developing,
    Improving,
}

/// Rolling per-corner learned values, bounded to the last 10 traversals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CornerStats {
    pub brake_points: Vec<f64>,
    pub entry_speeds_mps: Vec<f64>,
    pub exit_speeds_mps: Vec<f64>,
    pub lap_times_s: Vec<f64>,
    pub best_brake_point: Option<f64>,
    pub best_entry_speed_mps: Option<f64>,
    /// Best speed carried through the corner this session, m/s.
    pub best_corner_speed_mps: Option<f64>,
}

/// The per-session mutable aggregate that persists across runs per
/// (track, car).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub track_name: String,
    pub car_name: String,
    /// Epoch seconds.
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub laps: Vec<LapRecord>,
    pub best_lap_time_s: Option<f64>,
    pub best_lap_number: Option<u32>,
    pub baseline_established: bool,
    pub driving_style: DrivingStyle,
    pub consistency_threshold: f64,
    pub coaching_intensity: f64,
    pub corner_tables: BTreeMap<String, CornerStats>,
    /// Optimal upshift RPM band per gear.
    pub shift_bands: BTreeMap<i8, (f64, f64)>,
}

impl SessionState {
    pub fn new(session_id: String, track_name: String, car_name: String, start_time: f64) -> Self {
        Self {
            session_id,
            track_name,
            car_name,
            start_time,
            end_time: None,
            laps: Vec::new(),
            best_lap_time_s: None,
            best_lap_number: None,
            baseline_established: false,
            driving_style: DrivingStyle::Unknown,
            consistency_threshold: 0.05,
            coaching_intensity: 1.0,
            corner_tables: BTreeMap::new(),
            shift_bands: default_shift_bands(),
        }
    }

    /// Lap times of valid laps, in completion order.
    pub fn valid_lap_times(&self) -> Vec<f64> {
        self.laps
            .iter()
            .filter(|l| l.is_valid && l.lap_time_s > 0.0)
            .map(|l| l.lap_time_s)
            .collect()
    }
}

/// Default upshift RPM bands before any learning has happened.
pub fn default_shift_bands() -> BTreeMap<i8, (f64, f64)> {
    let mut bands = BTreeMap::new();
    bands.insert(1, (6000.0, 7500.0));
    for gear in 2..=6 {
        bands.insert(gear, (6500.0, 7800.0));
    }
    bands
}
