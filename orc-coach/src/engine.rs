//! Coaching engine
//!
//! The per-sample step function: ingest → lap/sector events → segment
//! location → detectors → corner micro-analysis and mistake tracking →
//! reference updates → coaching decisions. The engine owns every pipeline
//! stage except the message queue, which it shares with the delivery task,
//! and the enricher, which runs on its own task and receives requests
//! through the step output.

use crate::decider::{CoachingDecider, Decision};
use crate::detectors::{
    BrakingDetector, ConsistencyDetector, Detector, DetectorContext, DynamicsDetector,
    HandlingDetector, OffTrackDetector, ShiftDetector,
};
use crate::enrich::{EnrichContext, SessionFigures};
use crate::ingest::{Ingest, IngestStats, PushOutcome};
use crate::laps::{LapEvent, LapTracker};
use crate::micro::{self, CornerTracker};
use crate::mistakes::MistakeTracker;
use crate::persist::{persist_or_warn, SessionStore};
use crate::queue::{MessageQueue, QueueStats};
use crate::reference::ReferenceManager;
use crate::segments::{SegmentLocator, TrackCatalog};
use crate::session::{LapOutcome, SessionTracker};
use orc_core::config::CoachConfig;
use orc_core::model::{
    CoachingMessage, LapRecord, PatternInsight, SegmentKind, SessionPhase, SessionSummary,
    TelemetrySample,
};
use orc_core::units::mps_to_kph;
use std::sync::{Arc, Mutex};
use tracing::info;

/// A request for the LLM task.
#[derive(Debug)]
pub struct EnrichRequest {
    pub fallback: CoachingMessage,
    pub insight: PatternInsight,
    pub context: EnrichContext,
}

/// What one processed sample produced, beyond queue mutations.
#[derive(Debug, Default)]
pub struct StepOutput {
    pub accepted: bool,
    pub lap_events: Vec<LapEvent>,
    pub enrich_requests: Vec<EnrichRequest>,
    /// Session started or switched on this sample.
    pub session_changed: bool,
}

pub struct CoachingEngine {
    config: CoachConfig,
    ingest: Ingest,
    laps: LapTracker,
    catalog: TrackCatalog,
    locator: SegmentLocator,
    handling: HandlingDetector,
    braking: BrakingDetector,
    dynamics: DynamicsDetector,
    offtrack: OffTrackDetector,
    shift: ShiftDetector,
    consistency: ConsistencyDetector,
    corners: CornerTracker,
    session: SessionTracker,
    mistakes: Option<MistakeTracker>,
    references: Option<ReferenceManager>,
    decider: CoachingDecider,
    queue: Arc<Mutex<MessageQueue>>,
    store: SessionStore,
}

impl CoachingEngine {
    pub fn new(config: CoachConfig, store: SessionStore) -> Self {
        let queue = Arc::new(Mutex::new(MessageQueue::new(config.queue.clone())));
        let catalog = TrackCatalog::new(Some(store.data_dir().join("track_segments.json")));
        Self {
            ingest: Ingest::new(&config.buffer),
            laps: LapTracker::new(config.laps.clone()),
            catalog,
            locator: SegmentLocator::without_metadata(),
            handling: HandlingDetector::new(config.handling.clone()),
            braking: BrakingDetector::new(config.braking.clone()),
            dynamics: DynamicsDetector::new(config.dynamics.clone()),
            offtrack: OffTrackDetector::new(config.off_track.clone()),
            shift: ShiftDetector::new(config.shift.clone(), orc_core::model::default_shift_bands()),
            consistency: ConsistencyDetector::new(config.consistency.clone()),
            corners: CornerTracker::new(config.micro.clone()),
            session: SessionTracker::new(config.session.clone()),
            mistakes: None,
            references: None,
            decider: CoachingDecider::new(config.llm.clone()),
            queue,
            store,
            config,
        }
    }

    /// Shared handle for the delivery task.
    pub fn queue_handle(&self) -> Arc<Mutex<MessageQueue>> {
        Arc::clone(&self.queue)
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingest.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.lock().map(|q| q.stats()).unwrap_or_default()
    }

    pub fn session_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn baseline_established(&self) -> bool {
        self.session.baseline_established()
    }

    pub fn track_name(&self) -> Option<String> {
        self.session.state().map(|s| s.track_name.clone())
    }

    pub fn car_name(&self) -> Option<String> {
        self.session.state().map(|s| s.car_name.clone())
    }

    pub fn session_summary(&self, now: f64) -> Option<SessionSummary> {
        self.mistakes.as_ref().map(|m| m.session_summary(now))
    }

    /// Coaching mode presets adjust how forgiving the consistency check is.
    pub fn set_coaching_mode(&mut self, mode: &str) -> bool {
        let threshold = match mode {
            "beginner" => 0.10,
            "intermediate" => 0.05,
            "advanced" => 0.02,
            _ => return false,
        };
        if let Some(state) = self.session.state_mut() {
            state.consistency_threshold = threshold;
        }
        info!(mode, "coaching mode set");
        true
    }

    /// Process one raw sample through the whole pipeline.
    pub fn process_sample(&mut self, raw: TelemetrySample) -> StepOutput {
        let mut output = StepOutput::default();

        if self.ingest.push(raw) != PushOutcome::Accepted {
            return output;
        }
        output.accepted = true;
        let sample = match self.ingest.latest() {
            Some(s) => s.clone(),
            None => return output,
        };
        let now = sample.timestamp;

        // Session lifecycle: a (track, car) change closes the session and
        // lets the next sample start a fresh one.
        if self.session_identity_changed(&sample) {
            self.close_session(epoch_now());
            output.session_changed = true;
        }
        if self.session.maybe_start(&sample, epoch_now()) {
            self.start_session_context(&sample);
            output.session_changed = true;
        }
        if !self.session.is_active() {
            return output;
        }

        // Segment location for corner-aware detectors.
        let segment = self.locator.current_segment(sample.lap_dist_pct).clone();
        let in_corner = matches!(segment.kind, SegmentKind::Corner | SegmentKind::Chicane);
        let corner_id = in_corner.then(|| segment.id.clone());
        let corner_name = in_corner.then(|| segment.name.clone());

        // Lap and sector events.
        let lap_events = self.laps.update(&sample);
        for event in &lap_events {
            if let LapEvent::LapCompleted(record) = event {
                self.on_lap_completed(record, now);
            }
        }
        output.lap_events = lap_events;

        let established = self.session.baseline_established();

        // Baseline countdown is the only coaching surface pre-baseline.
        if !established {
            if let Some(insight) = self.session.baseline_countdown(&sample) {
                self.dispatch(&insight, now, &mut output);
            }
        }

        // Corner traversal tracking runs regardless of the baseline so
        // references accumulate from the first clean lap.
        if let Some(traversal) =
            self.corners.update(&sample, corner_id.as_deref(), corner_name.as_deref())
        {
            self.on_corner_completed(&traversal, now, established, &mut output);
        }

        // Detector scans. State accumulates pre-baseline; messages are
        // gated on the baseline.
        let snapshot = self.ingest.snapshot(5.0);
        let cx = DetectorContext {
            corner_id: corner_id.as_deref(),
            corner_name: corner_name.as_deref(),
            baseline_established: established,
        };
        let mut insights = Vec::new();
        insights.extend(self.handling.scan(&snapshot, &cx));
        insights.extend(self.braking.scan(&snapshot, &cx));
        insights.extend(self.dynamics.scan(&snapshot, &cx));
        insights.extend(self.offtrack.scan(&snapshot, &cx));
        insights.extend(self.shift.scan(&snapshot, &cx));

        if established {
            for mut insight in insights {
                // Attach the reference delta when a benchmark exists.
                if insight.reference.is_none() {
                    if let Some(refs) = &self.references {
                        insight.reference =
                            refs.reference_context(sample.lap_dist_pct, sample.current_lap_time_s);
                    }
                }
                self.dispatch(&insight, now, &mut output);
            }
        }

        output
    }

    fn session_identity_changed(&self, sample: &TelemetrySample) -> bool {
        let Some(state) = self.session.state() else { return false };
        match (&sample.track_name, &sample.car_name) {
            (Some(track), Some(car)) => {
                !track.is_empty()
                    && !car.is_empty()
                    && (*track != state.track_name || *car != state.car_name)
            }
            _ => false,
        }
    }

    /// Wire up per-(track, car) context after a session is created:
    /// segment metadata, reference data, learned baseline, trackers.
    fn start_session_context(&mut self, sample: &TelemetrySample) {
        let track = sample.track_name.clone().unwrap_or_default();
        let car = sample.car_name.clone().unwrap_or_default();

        self.laps.set_context(&track, &car);

        self.locator = match self.catalog.get_segments(&track) {
            Some(segments) => SegmentLocator::new(segments),
            None => SegmentLocator::without_metadata(),
        };

        let mut references =
            ReferenceManager::new(self.config.reference.clone(), track.clone(), car.clone());
        references.load(
            self.store.load_references(&track, &car),
            self.store.load_corner_references(),
        );

        // Read-through baseline: a pair we have coached before skips the
        // countdown and keeps its learned values.
        if let Some(baseline) = self.store.get_track_baseline(&track, &car) {
            self.session.apply_baseline(
                baseline.baseline_established,
                baseline.consistency_threshold,
                baseline.shift_bands.clone(),
                baseline.corner_tables,
                baseline.best_lap_time,
            );
            if !baseline.shift_bands.is_empty() {
                self.shift =
                    ShiftDetector::new(self.config.shift.clone(), baseline.shift_bands);
            }
        }

        let session_id = self
            .session
            .state()
            .map(|s| s.session_id.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let start = self.session.state().map(|s| s.start_time).unwrap_or(0.0);
        self.mistakes = Some(MistakeTracker::new(
            self.config.mistakes.clone(),
            session_id,
            start,
        ));
        self.references = Some(references);
        self.corners.reset();
    }

    fn on_lap_completed(&mut self, record: &LapRecord, now: f64) {
        let outcome = self.session.on_lap_completed(record);

        if outcome == LapOutcome::BaselineEstablished {
            let insight = self.session.baseline_established_insight();
            let mut output = StepOutput::default();
            self.dispatch(&insight, now, &mut output);
            // Baseline messages never escalate; drop any stray requests.
            debug_assert!(output.enrich_requests.is_empty());
        }

        if outcome == LapOutcome::Ignored {
            return;
        }

        let best = self.session.state().and_then(|s| s.best_lap_time_s);
        self.shift.on_lap_completed(record.lap_time_s, best);
        if let Some(state) = self.session.state_mut() {
            state.shift_bands = self.shift.bands().clone();
        }

        // Consistency insights only make sense once the baseline exists.
        if self.session.baseline_established() {
            let (times, threshold) = match self.session.state() {
                Some(s) => (s.valid_lap_times(), s.consistency_threshold),
                None => (Vec::new(), 0.05),
            };
            let insights = self.consistency.on_lap(&times, threshold);
            let mut output = StepOutput::default();
            for insight in insights {
                self.dispatch(&insight, now, &mut output);
            }
        }

        // Reference updates, write-through for the durable kinds.
        let valid_times = self.session.state().map(|s| s.valid_lap_times()).unwrap_or_default();
        let segments = self.locator_segments();
        if let Some(references) = self.references.as_mut() {
            let updated =
                references.on_lap_completed(record, &segments, &valid_times, epoch_now());
            if !updated.is_empty() {
                persist_or_warn(
                    self.store.save_references(
                        references.track_name(),
                        references.car_name(),
                        &references.durable_laps(),
                    ),
                    "reference laps",
                );
            }
        }

        // Personal-best persistence is write-through but off the lap's hot
        // path from the caller's perspective (this runs on the analysis
        // task, not ingest).
        if let Some(state) = self.session.state() {
            if state.best_lap_number == Some(record.lap_number) {
                persist_or_warn(self.store.save_session(state), "session state");
            }
        }
    }

    fn locator_segments(&mut self) -> Vec<orc_core::model::TrackSegment> {
        let track = self.track_name().unwrap_or_default();
        self.catalog.get_segments(&track).unwrap_or_else(|| {
            vec![orc_core::model::TrackSegment::whole_track()]
        })
    }

    fn on_corner_completed(
        &mut self,
        traversal: &micro::CornerTraversal,
        now: f64,
        established: bool,
        output: &mut StepOutput,
    ) {
        let (track, car) = match self.session.state() {
            Some(s) => (s.track_name.clone(), s.car_name.clone()),
            None => return,
        };

        let Some(references) = self.references.as_mut() else { return };

        // Missing reference: derive one from this traversal and persist.
        if references.corner_reference(&traversal.corner_id).is_none() {
            if let Some(derived) =
                micro::derive_reference(traversal, &track, &car, &self.config.micro)
            {
                references.add_corner_reference(derived);
                persist_or_warn(
                    self.store.save_corner_references(&references.corner_references()),
                    "corner references",
                );
            }
        }

        let Some(reference) = references.corner_reference(&traversal.corner_id).cloned() else {
            return;
        };

        let analysis = micro::analyze(traversal, &reference, &self.config.micro);

        // Learned corner tables feed approach coaching and persistence.
        let entry_speed = traversal.samples.first().map(|s| s.speed_mps).unwrap_or(0.0);
        let exit_speed = traversal.samples.last().map(|s| s.speed_mps).unwrap_or(0.0);
        let brake_point = traversal
            .samples
            .iter()
            .find(|s| s.brake > self.config.micro.input_threshold)
            .map(|s| s.lap_dist_pct);
        if let Some(bp) = brake_point {
            self.session.track_corner_brake(&traversal.corner_id, bp, entry_speed);
        }
        let lap_hint = traversal
            .samples
            .last()
            .and_then(|s| s.current_lap_time_s)
            .unwrap_or(0.0);
        self.session.track_corner_exit(&traversal.corner_id, exit_speed, lap_hint);

        if let Some(tracker) = self.mistakes.as_mut() {
            tracker.record(&analysis, now);
        }

        if !established {
            return;
        }

        // Approach coaching from the learned corner table.
        if let Some(insight) =
            self.session.corner_brake_advice(&traversal.corner_id, &traversal.corner_name)
        {
            self.dispatch(&insight, now, output);
        }

        // Positive reinforcement for a best carried speed.
        let carried = traversal.samples.iter().map(|s| s.speed_mps).fold(0.0, f64::max);
        if let Some(insight) = self.session.corner_personal_best(
            &traversal.corner_id,
            &traversal.corner_name,
            carried,
            now,
        ) {
            self.dispatch(&insight, now, output);
        }

        match self.decider.decide_micro(&analysis, now) {
            Decision::Deliver(message) => self.enqueue(message),
            Decision::Enrich { fallback, insight } => {
                let context = self.build_enrich_context(&insight);
                output.enrich_requests.push(EnrichRequest { fallback, insight, context });
            }
        }
    }

    /// Route an insight through the decider into the queue or toward the
    /// enrichment task.
    fn dispatch(&mut self, insight: &PatternInsight, now: f64, output: &mut StepOutput) {
        match self.decider.decide(insight, now) {
            Decision::Deliver(message) => self.enqueue(message),
            Decision::Enrich { fallback, insight } => {
                let context = self.build_enrich_context(&insight);
                output.enrich_requests.push(EnrichRequest { fallback, insight, context });
            }
        }
    }

    fn enqueue(&self, message: CoachingMessage) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.enqueue(message);
        }
    }

    /// Enqueue a message produced outside the step function (the LLM task's
    /// results come back through here).
    pub fn enqueue_external(&self, message: CoachingMessage) {
        self.enqueue(message);
    }

    fn build_enrich_context(&mut self, insight: &PatternInsight) -> EnrichContext {
        let recent = self.ingest.last_n(30);
        let latest = recent.last().cloned();

        let (turn_name, segment_name) = match latest.as_ref() {
            Some(sample) => {
                let segment = self.locator.current_segment(sample.lap_dist_pct);
                (segment.name.clone(), segment.name.clone())
            }
            None => ("unknown".to_string(), "unknown".to_string()),
        };

        let best_apex = insight
            .corner_id
            .as_deref()
            .and_then(|id| self.references.as_ref().and_then(|r| r.corner_reference(id)))
            .map(|r| r.apex_speed_kph)
            .unwrap_or(0.0);
        let driver_apex = recent
            .iter()
            .map(|s| s.speed_mps)
            .fold(f64::INFINITY, f64::min);
        let driver_apex = if driver_apex.is_finite() { mps_to_kph(driver_apex) } else { 0.0 };

        let sector_delta = latest
            .as_ref()
            .and_then(|s| {
                self.references
                    .as_ref()
                    .and_then(|r| r.reference_context(s.lap_dist_pct, s.current_lap_time_s))
            })
            .map(|c| c.delta_s)
            .unwrap_or(0.0);

        let session = SessionFigures {
            session_type: latest
                .as_ref()
                .map(|s| phase_label(s.session_phase).to_string())
                .unwrap_or_else(|| "practice".to_string()),
            lap_number: latest.as_ref().map(|s| s.lap).unwrap_or(0),
            fuel_remaining_l: latest.as_ref().map(|s| s.fuel_level_l).unwrap_or(0.0),
            best_lap_time: self.session.state().and_then(|s| s.best_lap_time_s),
            current_lap_time: latest.as_ref().and_then(|s| s.current_lap_time_s),
        };

        EnrichContext {
            recent_samples: recent,
            track_name: self.track_name().unwrap_or_default(),
            turn_name,
            segment_name,
            best_apex_speed_kph: best_apex,
            driver_apex_speed_kph: driver_apex,
            sector_delta_s: sector_delta,
            session,
        }
    }

    /// Persist and drop the current session; called on identity change and
    /// at shutdown.
    pub fn close_session(&mut self, now_epoch: f64) {
        if let Some(state) = self.session.close(now_epoch) {
            // Final write retries anything that failed mid-session.
            persist_or_warn(self.store.save_session(&state), "final session state");
            if let Some(references) = &self.references {
                persist_or_warn(
                    self.store.save_references(
                        references.track_name(),
                        references.car_name(),
                        &references.durable_laps(),
                    ),
                    "final reference laps",
                );
                persist_or_warn(
                    self.store.save_corner_references(&references.corner_references()),
                    "final corner references",
                );
            }
            info!(session = %state.session_id, "session state persisted at close");
        }
        self.mistakes = None;
        self.references = None;
        self.corners.reset();
        if let Ok(mut queue) = self.queue.lock() {
            queue.clear();
        }
    }
}

fn phase_label(phase: SessionPhase) -> &'static str {
    match phase {
        SessionPhase::Invalid => "invalid",
        SessionPhase::GetInCar => "get_in_car",
        SessionPhase::Warmup => "warmup",
        SessionPhase::Parade => "parade",
        SessionPhase::Racing => "race",
        SessionPhase::Checkered => "checkered",
        SessionPhase::Cooldown => "cooldown",
    }
}

/// Epoch seconds.
fn epoch_now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
