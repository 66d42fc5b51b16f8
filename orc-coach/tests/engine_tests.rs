//! End-to-end pipeline scenarios driven through the CoachingEngine

use orc_coach::engine::CoachingEngine;
use orc_coach::persist::SessionStore;
use orc_core::config::CoachConfig;
use orc_core::model::{
    CoachingMessage, MessageCategory, MessagePriority, SessionPhase, TelemetrySample, TrackSurface,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique scratch directory per test.
fn scratch_dir(tag: &str) -> PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("orc-engine-tests-{}-{tag}-{n}", std::process::id()))
}

fn engine_at(dir: &PathBuf) -> CoachingEngine {
    let store = SessionStore::new(dir.clone()).expect("store");
    CoachingEngine::new(CoachConfig::default(), store)
}

fn base_sample(ts: f64, lap: u32, pct: f64) -> TelemetrySample {
    TelemetrySample {
        timestamp: ts,
        lap,
        lap_dist_pct: pct,
        speed_mps: 40.0,
        rpm: 6000.0,
        gear: 4,
        throttle: 0.8,
        brake: 0.0,
        steering_rad: 0.0,
        yaw_rate_rps: 0.0,
        // Keeps grip-circle utilization above the underused threshold so
        // steady driving stays quiet.
        lat_accel_g: 1.4,
        long_accel_g: 0.0,
        vert_accel_g: -1.0,
        velocity_x_mps: 40.0,
        velocity_y_mps: 0.0,
        tire_pressures_kpa: [170.0; 4],
        tire_temps_c: None,
        fuel_level_l: 40.0,
        fuel_use_per_hour_l: 30.0,
        on_pit_road: false,
        track_surface: TrackSurface::OnTrack,
        session_phase: SessionPhase::Racing,
        session_flags: 0,
        last_lap_time_s: None,
        current_lap_time_s: Some(0.0),
        track_name: Some("TrackA".to_string()),
        car_name: Some("CarA".to_string()),
    }
}

/// Feed one sample and drain anything deliverable, like the delivery task.
fn step(engine: &mut CoachingEngine, sample: TelemetrySample, delivered: &mut Vec<CoachingMessage>) {
    let now = sample.timestamp;
    engine.process_sample(sample);
    let queue = engine.queue_handle();
    let mut queue = queue.lock().unwrap();
    while let Some(message) = queue.dequeue(now) {
        delivered.push(message);
    }
}

/// Drive one full lap of `lap_time` seconds at 60 Hz, returning the time
/// after the lap-closing sample.
fn drive_lap(
    engine: &mut CoachingEngine,
    lap: u32,
    t0: f64,
    lap_time: f64,
    delivered: &mut Vec<CoachingMessage>,
) -> f64 {
    let steps = (lap_time * 60.0) as usize;
    for i in 0..steps {
        let pct = i as f64 / steps as f64;
        let mut sample = base_sample(t0 + pct * lap_time, lap, pct);
        sample.current_lap_time_s = Some(pct * lap_time);
        step(engine, sample, delivered);
    }
    // Lap boundary sample with the sim-reported time.
    let mut boundary = base_sample(t0 + lap_time, lap + 1, 0.0);
    boundary.last_lap_time_s = Some(lap_time);
    boundary.current_lap_time_s = Some(0.0);
    step(engine, boundary, delivered);
    t0 + lap_time
}

#[test]
fn baseline_countdown_then_full_coaching() {
    let dir = scratch_dir("baseline");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    let mut t = 0.0;
    for lap in 1..=3 {
        t = drive_lap(&mut engine, lap, t, 90.0, &mut delivered);
    }

    let established_at = delivered
        .iter()
        .position(|m| {
            m.category == MessageCategory::Baseline
                && m.content.contains("baseline")
                && m.content.contains("established")
        })
        .expect("baseline-established message after the third valid lap");

    // Before that, only baseline-category coaching is allowed.
    for message in &delivered[..established_at] {
        assert_eq!(
            message.category,
            MessageCategory::Baseline,
            "pre-baseline message leaked: {:?} {}",
            message.category,
            message.content
        );
    }

    // The countdown mentioned the remaining lap count at least once.
    assert!(
        delivered[..established_at]
            .iter()
            .any(|m| m.content.contains('3') || m.content.contains('2') || m.content.contains('1')),
        "countdown should mention remaining laps"
    );

    assert!(engine.baseline_established());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn understeer_stimulus_produces_one_handling_message() {
    let dir = scratch_dir("understeer");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    let mut t = 0.0;
    for lap in 1..=3 {
        t = drive_lap(&mut engine, lap, t, 90.0, &mut delivered);
    }
    delivered.clear();

    // Constant-radius turn whose yaw response is far below expectation:
    // steering 0.25 rad at 30 m/s with almost no yaw.
    let stimulus = |t0: f64, delivered: &mut Vec<CoachingMessage>, engine: &mut CoachingEngine| {
        for i in 0..120 {
            let mut sample = base_sample(t0 + i as f64 / 60.0, 4, 0.3 + i as f64 * 0.0005);
            sample.speed_mps = 30.0;
            sample.velocity_x_mps = 30.0;
            sample.velocity_y_mps = 1.0;
            sample.steering_rad = 0.25;
            sample.yaw_rate_rps = 0.01;
            sample.throttle = 0.1;
            sample.current_lap_time_s = Some(30.0 + i as f64 / 60.0);
            step(engine, sample, delivered);
        }
    };
    stimulus(t, &mut delivered, &mut engine);

    let handling: Vec<&CoachingMessage> = delivered
        .iter()
        .filter(|m| m.category == MessageCategory::Handling)
        .collect();
    assert_eq!(handling.len(), 1, "exactly one handling message: {handling:?}");
    assert!(
        handling[0].priority <= MessagePriority::High,
        "priority must be high or critical, got {:?}",
        handling[0].priority
    );
    assert!(handling[0].content.to_lowercase().contains("understeer"));

    // The same stimulus a few seconds later stays silent.
    delivered.clear();
    stimulus(t + 4.0, &mut delivered, &mut engine);
    assert!(
        delivered.iter().all(|m| m.category != MessageCategory::Handling),
        "repeat inside the cooldown must not deliver"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn off_track_under_braking_classified() {
    let dir = scratch_dir("offtrack");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    let mut t = 0.0;
    for lap in 1..=3 {
        t = drive_lap(&mut engine, lap, t, 90.0, &mut delivered);
    }
    delivered.clear();

    // 120 km/h, 40% brake, no throttle; surface flips to off-track.
    let mut on = base_sample(t + 1.0, 4, 0.4);
    on.speed_mps = 33.3;
    on.brake = 0.4;
    on.throttle = 0.0;
    step(&mut engine, on, &mut delivered);

    let mut off = base_sample(t + 1.016, 4, 0.401);
    off.speed_mps = 33.3;
    off.brake = 0.4;
    off.throttle = 0.0;
    off.track_surface = TrackSurface::OffTrack;
    step(&mut engine, off, &mut delivered);

    // Keep the pipeline ticking so a rate-limited delivery drains.
    for i in 0..1800 {
        let sample = base_sample(t + 2.0 + i as f64 / 60.0, 4, 0.41 + i as f64 * 0.0001);
        step(&mut engine, sample, &mut delivered);
    }

    let message = delivered
        .iter()
        .find(|m| {
            m.category == MessageCategory::Braking || m.category == MessageCategory::RacingLine
        })
        .expect("an off-track excursion message");
    assert!(message.priority <= MessagePriority::High);
    let potential = message.improvement_potential_s.expect("improvement potential");
    assert!((potential - 0.2).abs() < 0.05, "potential {potential}");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn non_critical_delivery_respects_global_rate_limit() {
    let dir = scratch_dir("ratelimit");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    let mut t = 0.0;
    for lap in 1..=8 {
        t = drive_lap(&mut engine, lap, t, 90.0, &mut delivered);
    }

    // Count non-critical deliveries in every sliding minute.
    for window_start in (0..(t as usize)).step_by(10) {
        let count = delivered
            .iter()
            .filter(|m| {
                m.priority != MessagePriority::Critical
                    && m.timestamp >= window_start as f64
                    && m.timestamp < window_start as f64 + 60.0
            })
            .count();
        assert!(count <= 5, "{count} non-critical messages in one minute");
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn session_persists_and_baseline_survives_restart() {
    let dir = scratch_dir("persist");
    let mut delivered = Vec::new();

    let best = {
        let mut engine = engine_at(&dir);
        let mut t = 0.0;
        let times = [92.0, 90.5, 91.0, 90.0, 90.8];
        for (i, lap_time) in times.iter().enumerate() {
            t = drive_lap(&mut engine, i as u32 + 1, t, *lap_time, &mut delivered);
        }
        engine.close_session(5_000.0);
        times.iter().copied().fold(f64::INFINITY, f64::min)
    };

    // Reload through a fresh engine on the same data directory.
    let store = SessionStore::new(dir.clone()).expect("store");
    let baseline = store.get_track_baseline("TrackA", "CarA").expect("baseline persisted");
    assert!(baseline.baseline_established);
    assert_eq!(baseline.best_lap_time, Some(best));

    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();
    step(&mut engine, base_sample(0.0, 1, 0.0), &mut delivered);
    assert!(engine.session_active());
    assert!(
        engine.baseline_established(),
        "restored baseline must skip the countdown"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn malformed_samples_rejected_without_disturbing_the_pipeline() {
    let dir = scratch_dir("malformed");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    step(&mut engine, base_sample(0.0, 1, 0.0), &mut delivered);

    let mut bad = base_sample(0.1, 1, 0.001);
    bad.speed_mps = f64::NAN;
    let out = engine.process_sample(bad);
    assert!(!out.accepted);
    assert_eq!(engine.ingest_stats().malformed, 1);

    // A late (stale) sample is dropped too.
    let mut stale = base_sample(-1.0, 1, 0.002);
    stale.timestamp = -1.0;
    let out = engine.process_sample(stale);
    assert!(!out.accepted);

    // The pipeline keeps going afterwards.
    let out = engine.process_sample(base_sample(0.2, 1, 0.003));
    assert!(out.accepted);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corner_traversal_yields_cornering_message_after_baseline() {
    let dir = scratch_dir("corner");
    let mut engine = engine_at(&dir);
    let mut delivered = Vec::new();

    let mut t = 0.0;
    for lap in 1..=3 {
        t = drive_lap(&mut engine, lap, t, 90.0, &mut delivered);
    }
    delivered.clear();

    // A deliberately scrappy corner: late brake, slow apex.
    let mut drive_corner = |t0: f64, apex_speed: f64, delivered: &mut Vec<CoachingMessage>| {
        for i in 0..40 {
            let progress = i as f64 / 40.0;
            let mut sample = base_sample(t0 + i as f64 / 60.0, 4, 0.40 + progress * 0.05);
            sample.steering_rad = if progress < 0.9 { 0.3 } else { 0.01 };
            sample.speed_mps =
                40.0 - (40.0 - apex_speed) * (1.0 - (progress - 0.5).abs() * 2.0).max(0.0);
            sample.brake = if progress < 0.3 { 0.7 } else { 0.0 };
            sample.throttle = if progress > 0.6 { 0.9 } else { 0.0 };
            sample.current_lap_time_s = Some(40.0 + i as f64 / 60.0);
            step(&mut engine, sample, delivered);
        }
    };

    // First traversal seeds the corner reference.
    drive_corner(t + 1.0, 25.0, &mut delivered);
    // Second traversal is slower at the apex: quantitative deltas exist.
    drive_corner(t + 30.0, 18.0, &mut delivered);

    assert!(
        delivered.iter().any(|m| m.category == MessageCategory::Cornering),
        "expected a cornering message, got {:?}",
        delivered.iter().map(|m| (m.category, m.content.clone())).collect::<Vec<_>>()
    );

    let _ = std::fs::remove_dir_all(&dir);
}
