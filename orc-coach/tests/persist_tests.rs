//! Persistence round-trips through the on-disk JSON layout

use orc_coach::persist::SessionStore;
use orc_core::model::{
    CornerDifficulty, CornerReference, CornerSpeedClass, LapMetadata, LapRecord, ReferenceKind,
    ReferenceLap, SessionState,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

static DIR_COUNTER: AtomicU64 = AtomicU64::new(0);

fn scratch_dir(tag: &str) -> PathBuf {
    let n = DIR_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("orc-persist-tests-{}-{tag}-{n}", std::process::id()))
}

fn lap(number: u32, time: f64) -> LapRecord {
    LapRecord {
        lap_number: number,
        lap_time_s: time,
        sector_times_s: vec![time / 3.0, time / 3.0, time / 3.0],
        samples: Vec::new(),
        track_name: "TrackA".to_string(),
        car_name: "CarA".to_string(),
        completed_at: 1_700_000_000.0 + number as f64,
        is_valid: true,
        metadata: LapMetadata {
            sector_boundaries: vec![0.0, 0.33, 0.66, 1.0],
            sample_count: 5400,
        },
    }
}

fn session(id: &str, best: f64) -> SessionState {
    let mut state = SessionState::new(
        id.to_string(),
        "TrackA".to_string(),
        "CarA".to_string(),
        1_700_000_000.0,
    );
    state.laps = vec![lap(1, best + 1.0), lap(2, best)];
    state.best_lap_time_s = Some(best);
    state.best_lap_number = Some(2);
    state.baseline_established = true;
    state.consistency_threshold = 0.042;
    state
}

#[test]
fn session_round_trip_is_structurally_equal() {
    let dir = scratch_dir("roundtrip");
    let store = SessionStore::new(dir.clone()).expect("store");

    let original = session("TrackA_CarA_1700000000", 90.25);
    store.save_session(&original).expect("save");

    let reloaded = store.load_session(&original.session_id).expect("load");
    assert_eq!(reloaded.session_id, original.session_id);
    assert_eq!(reloaded.track_name, original.track_name);
    assert_eq!(reloaded.car_name, original.car_name);
    assert_eq!(reloaded.best_lap_time_s, original.best_lap_time_s);
    assert_eq!(reloaded.baseline_established, original.baseline_established);
    assert_eq!(reloaded.consistency_threshold, original.consistency_threshold);
    assert_eq!(reloaded.laps.len(), original.laps.len());
    assert_eq!(reloaded.laps[1].lap_time_s, original.laps[1].lap_time_s);
    assert_eq!(reloaded.laps[1].sector_times_s, original.laps[1].sector_times_s);
    assert_eq!(reloaded.shift_bands, original.shift_bands);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn index_tracks_saved_sessions() {
    let dir = scratch_dir("index");
    let store = SessionStore::new(dir.clone()).expect("store");

    store.save_session(&session("s1", 91.0)).expect("save");
    store.save_session(&session("s2", 90.0)).expect("save");
    // Re-saving updates in place rather than duplicating.
    store.save_session(&session("s2", 89.5)).expect("save");

    let index = store.load_index();
    assert_eq!(index.len(), 2);
    let s2 = index.iter().find(|e| e.session_id == "s2").expect("s2 indexed");
    assert_eq!(s2.best_lap_time, Some(89.5));
    assert!(s2.baseline_established);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn baseline_read_through_picks_best_and_established() {
    let dir = scratch_dir("baseline");
    let store = SessionStore::new(dir.clone()).expect("store");

    let mut early = session("s1", 92.0);
    early.baseline_established = false;
    store.save_session(&early).expect("save");
    store.save_session(&session("s2", 90.0)).expect("save");

    let baseline = store.get_track_baseline("TrackA", "CarA").expect("baseline");
    assert!(baseline.baseline_established);
    assert_eq!(baseline.best_lap_time, Some(90.0));
    assert!((baseline.consistency_threshold - 0.042).abs() < 1e-9);

    assert!(store.get_track_baseline("TrackB", "CarA").is_none());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reset_baseline_demotes_and_removes_references() {
    let dir = scratch_dir("reset");
    let store = SessionStore::new(dir.clone()).expect("store");
    store.save_session(&session("s1", 90.0)).expect("save");

    let mut references = BTreeMap::new();
    references.insert(
        ReferenceKind::PersonalBest,
        ReferenceLap {
            track_name: "TrackA".to_string(),
            car_name: "CarA".to_string(),
            lap_time_s: 90.0,
            kind: ReferenceKind::PersonalBest,
            created_at: 1_700_000_100.0,
            segments: BTreeMap::new(),
            sample_count: 5400,
        },
    );
    store.save_references("TrackA", "CarA", &references).expect("save refs");
    assert!(!store.load_references("TrackA", "CarA").is_empty());

    store.reset_baseline("TrackA", "CarA").expect("reset");
    assert!(store.get_track_baseline("TrackA", "CarA").is_none());
    assert!(store.load_references("TrackA", "CarA").is_empty());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn reference_laps_round_trip_keyed_by_kind() {
    let dir = scratch_dir("refs");
    let store = SessionStore::new(dir.clone()).expect("store");

    let mut references = BTreeMap::new();
    for (kind, time) in [
        (ReferenceKind::PersonalBest, 90.0),
        (ReferenceKind::Optimal, 90.3),
        (ReferenceKind::RacePace, 91.2),
    ] {
        references.insert(
            kind,
            ReferenceLap {
                track_name: "TrackA".to_string(),
                car_name: "CarA".to_string(),
                lap_time_s: time,
                kind,
                created_at: 1_700_000_000.0,
                segments: BTreeMap::new(),
                sample_count: 100,
            },
        );
    }
    store.save_references("TrackA", "CarA", &references).expect("save");

    let loaded = store.load_references("TrackA", "CarA");
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[&ReferenceKind::PersonalBest].lap_time_s, 90.0);
    assert_eq!(loaded[&ReferenceKind::RacePace].lap_time_s, 91.2);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn corner_references_round_trip() {
    let dir = scratch_dir("corners");
    let store = SessionStore::new(dir.clone()).expect("store");

    let corner = CornerReference {
        corner_id: "t5".to_string(),
        corner_name: "Turn 5".to_string(),
        track_name: "TrackA".to_string(),
        car_name: "CarA".to_string(),
        position_start: 0.78,
        position_end: 0.93,
        brake_point_pct: 0.80,
        brake_pressure: 0.85,
        entry_speed_kph: 180.0,
        apex_speed_kph: 72.0,
        exit_speed_kph: 140.0,
        throttle_point_pct: 0.87,
        throttle_pressure: 0.95,
        steering_rad: 0.42,
        racing_line: vec![(0.80, 0.1), (0.85, 0.42), (0.90, 0.2)],
        corner_time_s: 6.5,
        gear: 2,
        speed_class: CornerSpeedClass::Slow,
        difficulty: CornerDifficulty::Hard,
        notes: "hairpin".to_string(),
    };
    store.save_corner_references(&[corner.clone()]).expect("save");

    let loaded = store.load_corner_references();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].corner_id, "t5");
    assert_eq!(loaded[0].apex_speed_kph, 72.0);
    assert_eq!(loaded[0].racing_line, corner.racing_line);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn missing_files_load_as_empty() {
    let dir = scratch_dir("empty");
    let store = SessionStore::new(dir.clone()).expect("store");
    assert!(store.load_index().is_empty());
    assert!(store.load_references("NoTrack", "NoCar").is_empty());
    assert!(store.load_corner_references().is_empty());
    let _ = std::fs::remove_dir_all(&dir);
}
