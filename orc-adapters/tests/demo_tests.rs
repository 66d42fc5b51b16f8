//! Integration tests for the DemoSource

use orc_adapters::DemoSource;
use orc_core::source::TelemetrySource;

#[test]
fn test_demo_source_name_and_key() {
    let source = DemoSource::new();
    assert_eq!(source.name(), "Demo");
    assert_eq!(source.key(), "demo");
}

#[test]
fn test_demo_source_detect_always_true() {
    let source = DemoSource::new();
    assert!(source.detect(), "DemoSource should always be detected");
}

#[test]
fn test_demo_source_initially_inactive() {
    let source = DemoSource::new();
    assert!(!source.is_active(), "DemoSource should be inactive before start()");
}

#[test]
fn test_demo_source_read_when_inactive_returns_none() {
    let mut source = DemoSource::new();
    let sample = source.read_sample().unwrap();
    assert!(sample.is_none(), "read_sample() should return None when inactive");
}

#[test]
fn test_demo_source_start_and_stop() {
    let mut source = DemoSource::new();

    source.start().expect("start() should succeed");
    assert!(source.is_active(), "source should be active after start()");

    source.stop().expect("stop() should succeed");
    assert!(!source.is_active(), "source should be inactive after stop()");
}

#[test]
fn test_demo_source_produces_valid_sample() {
    let mut source = DemoSource::new();
    source.start().expect("start() should succeed");

    let sample = source
        .read_sample()
        .expect("read_sample() should not error")
        .expect("read_sample() should return Some after start()");

    assert_eq!(sample.track_name.as_deref(), Some("Demo Circuit"));
    assert_eq!(sample.car_name.as_deref(), Some("Formula Demo"));
    assert!(sample.lap >= 1, "lap number should start at 1");
    assert!(
        (0.0..1.0).contains(&sample.lap_dist_pct),
        "lap_dist_pct {} should be in [0, 1)",
        sample.lap_dist_pct
    );
}

#[test]
fn test_demo_source_sample_values_in_reasonable_range() {
    let mut source = DemoSource::new();
    source.start().expect("start() should succeed");

    let sample = source.read_sample().unwrap().unwrap();

    assert!(
        (1200.0..=8000.0).contains(&sample.rpm),
        "RPM {} should be in engine range",
        sample.rpm
    );
    assert!(
        (0.0..=100.0).contains(&sample.speed_mps),
        "speed {} m/s should be reasonable",
        sample.speed_mps
    );
    assert!((1..=6).contains(&sample.gear), "gear {} should be 1..=6", sample.gear);
    assert!((0.0..=1.0).contains(&sample.throttle));
    assert!((0.0..=1.0).contains(&sample.brake));
    assert!(sample.fuel_level_l > 0.0, "fuel should not start empty");
    for pressure in sample.tire_pressures_kpa {
        assert!((100.0..=260.0).contains(&pressure), "tire pressure {pressure} kPa");
    }
}

#[test]
fn test_demo_source_timestamps_monotonic() {
    let mut source = DemoSource::new();
    source.start().expect("start() should succeed");

    let mut last = -1.0;
    for _ in 0..20 {
        let sample = source.read_sample().unwrap().unwrap();
        assert!(sample.timestamp >= last, "timestamps must be monotonic");
        last = sample.timestamp;
    }
}

#[test]
fn test_demo_source_serializes_to_json() {
    let mut source = DemoSource::new();
    source.start().expect("start() should succeed");

    let sample = source.read_sample().unwrap().unwrap();
    let json = serde_json::to_string(&sample).expect("sample should serialize");
    assert!(!json.is_empty());

    let parsed: serde_json::Value = serde_json::from_str(&json).expect("JSON should parse");
    assert_eq!(parsed["track_name"], "Demo Circuit");
    assert_eq!(parsed["track_surface"], "on_track");
}

#[test]
fn test_demo_source_default_trait() {
    let source = DemoSource::default();
    assert_eq!(source.name(), "Demo");
    assert!(!source.is_active());
}
