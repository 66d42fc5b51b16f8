//! Wire envelopes for the UI WebSocket streams
//!
//! Every outbound message is `{type, id?, timestamp, data}`. Priorities go
//! out as 1..4 (1 = critical) and confidences as 0..100.

use orc_core::model::{CoachingMessage, TelemetrySample};
use orc_core::units::mps_to_kph;
use serde_json::{json, Value};

fn envelope(kind: &str, data: Value) -> Value {
    json!({
        "type": kind,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "data": data,
    })
}

/// Handshake message sent when a client connects to any stream.
pub fn connected(stream: &str) -> String {
    envelope("connected", json!({ "stream": stream })).to_string()
}

/// A processed telemetry sample with the derived UI fields.
pub fn telemetry(sample: &TelemetrySample, session_active: bool) -> String {
    // Rough single-number figures the UI renders as gauges.
    let driving_intensity =
        ((sample.throttle + sample.brake + (sample.steering_rad.abs() / 0.5).min(1.0)) / 2.0)
            .min(1.0);
    let engine_stress = (sample.rpm / 8000.0).clamp(0.0, 1.0);

    envelope(
        "telemetry",
        json!({
            "lap": sample.lap,
            "lapDistPct": sample.lap_dist_pct,
            "speedKph": mps_to_kph(sample.speed_mps),
            "rpm": sample.rpm,
            "gear": sample.gear,
            "throttle": sample.throttle,
            "brake": sample.brake,
            "steeringRad": sample.steering_rad,
            "latG": sample.lat_accel_g,
            "longG": sample.long_accel_g,
            "fuelL": sample.fuel_level_l,
            "onPitRoad": sample.on_pit_road,
            "trackSurface": sample.track_surface,
            "drivingIntensity": driving_intensity,
            "engineStress": engine_stress,
            "sessionActive": session_active,
            "connected": true,
        }),
    )
    .to_string()
}

/// Session identity for the session stream.
pub fn session_info(track: Option<&str>, car: Option<&str>, active: bool) -> String {
    envelope(
        "sessionInfo",
        json!({
            "trackName": track.unwrap_or(""),
            "carName": car.unwrap_or(""),
            "active": active,
        }),
    )
    .to_string()
}

/// A delivered coaching message.
pub fn coaching(message: &CoachingMessage) -> String {
    let id = format!(
        "{}_{}",
        (message.timestamp * 1000.0) as i64,
        message.category.as_str()
    );
    let mut data = json!({
        "message": &message.content,
        "category": message.category.as_str(),
        "priority": message.priority.rank(),
        "confidence": (message.confidence * 100.0).round(),
        "source": message.source.as_str(),
        "context": &message.context,
        "secondary_messages": [],
    });
    if let Some(potential) = message.improvement_potential_s {
        data["improvement_potential"] = json!(potential);
    }
    if let Some(audio) = &message.audio {
        data["audio"] = json!(audio);
    }
    json!({
        "type": "coaching",
        "id": id,
        "timestamp": chrono::Utc::now().timestamp_millis(),
        "data": data,
    })
    .to_string()
}

/// Error reply for malformed or unknown client requests.
pub fn error(reason: &str) -> String {
    envelope("error", json!({ "message": reason })).to_string()
}
