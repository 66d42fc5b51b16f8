//! Unit conversion helpers
//!
//! Internal telemetry is SI: speeds in m/s, angles in radians, accelerations
//! in g. Simulator SDKs and user-facing figures mix mph and km/h, so the
//! conversions live here instead of being scattered through the detectors.

/// Standard gravity in m/s².
pub const GRAVITY: f64 = 9.81;

/// Multiply m/s by this to get km/h.
pub const MPS_TO_KPH: f64 = 3.6;

/// Multiply mph by this to get m/s.
pub const MPH_TO_MPS: f64 = 0.447_04;

/// Convert metres per second to kilometres per hour.
pub fn mps_to_kph(mps: f64) -> f64 {
    mps * MPS_TO_KPH
}

/// Convert kilometres per hour to metres per second.
pub fn kph_to_mps(kph: f64) -> f64 {
    kph / MPS_TO_KPH
}

/// Convert miles per hour to metres per second.
pub fn mph_to_mps(mph: f64) -> f64 {
    mph * MPH_TO_MPS
}

/// Convert radians to degrees.
pub fn rad_to_deg(rad: f64) -> f64 {
    rad.to_degrees()
}

/// Clamp a pedal/percentage value into [0, 1], normalizing 0-100 inputs.
///
/// SDK adapters report throttle and brake either as fractions or as
/// percentages; anything above 1.5 is assumed to be a percentage.
pub fn normalize_fraction(value: f64) -> f64 {
    let v = if value > 1.5 { value / 100.0 } else { value };
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kph_round_trip() {
        let v = kph_to_mps(mps_to_kph(33.3));
        assert!((v - 33.3).abs() < 1e-9);
    }

    #[test]
    fn normalize_handles_both_scales() {
        assert!((normalize_fraction(0.45) - 0.45).abs() < 1e-9);
        assert!((normalize_fraction(45.0) - 0.45).abs() < 1e-9);
        assert_eq!(normalize_fraction(130.0), 1.0);
        assert_eq!(normalize_fraction(-0.2), 0.0);
    }
}
