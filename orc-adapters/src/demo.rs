//! Demo source that synthesizes telemetry for development and testing
//!
//! Simulates laps around a fictional circuit with straights, braking zones,
//! corners, a chicane and a hairpin, at 60 Hz, with everything the coaching
//! detectors consume: lap distance fraction, yaw rate, lateral and
//! longitudinal g, gear/rpm, pedals, tire pressures and fuel.

use anyhow::Result;
use orc_core::model::{SessionPhase, TelemetrySample, TrackSurface};
use orc_core::source::TelemetrySource;
use std::time::Instant;

// =============================================================================
// Circuit definition — a sequence of phases that form a lap
// =============================================================================

#[derive(Clone, Copy)]
enum PhaseKind {
    Straight,
    Braking,
    Corner,
    Accel,
}

#[derive(Clone, Copy)]
struct LapPhase {
    kind: PhaseKind,
    /// Seconds to traverse at representative pace.
    duration: f64,
    /// Target speed at the end of the phase, m/s.
    target_speed: f64,
    /// Peak steering angle, radians; signed, positive = right.
    steering: f64,
    /// Peak lateral g.
    lateral_g: f64,
}

/// ~85 s lap: start/finish straight, five corners including a chicane and a
/// hairpin.
fn demo_circuit() -> Vec<LapPhase> {
    vec![
        LapPhase { kind: PhaseKind::Straight, duration: 8.0, target_speed: 75.0, steering: 0.0, lateral_g: 0.0 },
        // T1: heavy braking into a slow right-hander
        LapPhase { kind: PhaseKind::Braking, duration: 3.0, target_speed: 28.0, steering: 0.02, lateral_g: 0.1 },
        LapPhase { kind: PhaseKind::Corner, duration: 4.0, target_speed: 25.0, steering: 0.35, lateral_g: 1.8 },
        LapPhase { kind: PhaseKind::Accel, duration: 3.5, target_speed: 55.0, steering: 0.1, lateral_g: 0.4 },
        LapPhase { kind: PhaseKind::Straight, duration: 4.0, target_speed: 62.0, steering: 0.0, lateral_g: 0.0 },
        // T2: fast left-hander
        LapPhase { kind: PhaseKind::Braking, duration: 2.0, target_speed: 45.0, steering: -0.02, lateral_g: -0.1 },
        LapPhase { kind: PhaseKind::Corner, duration: 3.5, target_speed: 42.0, steering: -0.22, lateral_g: -1.5 },
        LapPhase { kind: PhaseKind::Accel, duration: 3.0, target_speed: 58.0, steering: -0.05, lateral_g: -0.3 },
        LapPhase { kind: PhaseKind::Straight, duration: 10.0, target_speed: 80.0, steering: 0.0, lateral_g: 0.0 },
        // T3: chicane, quick right-left
        LapPhase { kind: PhaseKind::Braking, duration: 2.5, target_speed: 35.0, steering: 0.05, lateral_g: 0.2 },
        LapPhase { kind: PhaseKind::Corner, duration: 2.0, target_speed: 32.0, steering: 0.30, lateral_g: 1.6 },
        LapPhase { kind: PhaseKind::Corner, duration: 2.0, target_speed: 30.0, steering: -0.32, lateral_g: -1.7 },
        LapPhase { kind: PhaseKind::Accel, duration: 3.0, target_speed: 50.0, steering: -0.05, lateral_g: -0.2 },
        LapPhase { kind: PhaseKind::Straight, duration: 6.0, target_speed: 68.0, steering: 0.0, lateral_g: 0.0 },
        // T4: long sweeping right
        LapPhase { kind: PhaseKind::Braking, duration: 1.5, target_speed: 52.0, steering: 0.03, lateral_g: 0.1 },
        LapPhase { kind: PhaseKind::Corner, duration: 5.0, target_speed: 50.0, steering: 0.18, lateral_g: 1.3 },
        LapPhase { kind: PhaseKind::Accel, duration: 3.0, target_speed: 60.0, steering: 0.05, lateral_g: 0.3 },
        // T5: tight hairpin left
        LapPhase { kind: PhaseKind::Braking, duration: 3.5, target_speed: 22.0, steering: -0.03, lateral_g: -0.1 },
        LapPhase { kind: PhaseKind::Corner, duration: 4.5, target_speed: 20.0, steering: -0.42, lateral_g: -1.2 },
        LapPhase { kind: PhaseKind::Accel, duration: 4.0, target_speed: 55.0, steering: -0.1, lateral_g: -0.3 },
        LapPhase { kind: PhaseKind::Straight, duration: 6.0, target_speed: 72.0, steering: 0.0, lateral_g: 0.0 },
    ]
}

// =============================================================================
// Interpolation helpers
// =============================================================================

struct PhaseState {
    speed: f64,
    throttle: f64,
    brake: f64,
    steering: f64,
    lateral_g: f64,
    longitudinal_g: f64,
    gear: i8,
    rpm: f64,
}

fn compute_phase_state(circuit: &[LapPhase], lap_time: f64) -> PhaseState {
    let lap_duration: f64 = circuit.iter().map(|p| p.duration).sum();
    let t = lap_time % lap_duration;

    let mut elapsed = 0.0;
    let mut idx = circuit.len() - 1;
    for (i, phase) in circuit.iter().enumerate() {
        if elapsed + phase.duration > t {
            idx = i;
            break;
        }
        elapsed += phase.duration;
    }

    let phase = circuit[idx];
    let phase_t = ((t - elapsed) / phase.duration).clamp(0.0, 1.0);

    let prev_target = if idx > 0 {
        circuit[idx - 1].target_speed
    } else {
        circuit[circuit.len() - 1].target_speed
    };

    let smooth_t = smoothstep(phase_t);
    let speed = lerp(prev_target, phase.target_speed, smooth_t);

    let (throttle, brake) = match phase.kind {
        PhaseKind::Straight => (0.95 + 0.05 * (1.0 - phase_t), 0.0),
        PhaseKind::Braking => (0.0, (1.0 - smooth_t * 0.3).clamp(0.0, 1.0)),
        PhaseKind::Corner => (0.2 + 0.3 * phase_t, 0.0),
        PhaseKind::Accel => (0.5 + 0.5 * smooth_t, 0.0),
    };

    // Steering ramps in over the first half of the phase and out over the
    // second half.
    let envelope = if phase_t < 0.5 {
        smoothstep(phase_t * 2.0)
    } else {
        smoothstep((1.0 - phase_t) * 2.0)
    };
    let steering = phase.steering * envelope;
    let lateral_g = phase.lateral_g * envelope;

    let speed_rate = (phase.target_speed - prev_target) / phase.duration;
    let longitudinal_g = speed_rate / 9.81;

    let gear = speed_to_gear(speed);
    let rpm = speed_to_rpm(speed, gear);

    PhaseState { speed, throttle, brake, steering, lateral_g, longitudinal_g, gear, rpm }
}

fn smoothstep(t: f64) -> f64 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

fn speed_to_gear(speed_mps: f64) -> i8 {
    let kph = speed_mps * 3.6;
    match kph {
        x if x < 40.0 => 1,
        x if x < 80.0 => 2,
        x if x < 120.0 => 3,
        x if x < 170.0 => 4,
        x if x < 230.0 => 5,
        _ => 6,
    }
}

fn speed_to_rpm(speed_mps: f64, gear: i8) -> f64 {
    // Lower gear = higher RPM for the same speed.
    let base_ratio = match gear {
        1 => 130.0,
        2 => 85.0,
        3 => 60.0,
        4 => 45.0,
        5 => 36.0,
        _ => 30.0,
    };
    (speed_mps * base_ratio + 1200.0).clamp(1200.0, 8000.0)
}

/// Deterministic noise in [0, 1) from a seed.
fn noise(seed: f64) -> f64 {
    let x = (seed * 12.9898 + 78.233).sin() * 43_758.547;
    x - x.floor()
}

/// Small jitter centered around 0.
fn jitter(seed: f64, amplitude: f64) -> f64 {
    (noise(seed) - 0.5) * 2.0 * amplitude
}

// =============================================================================
// DemoSource
// =============================================================================

pub struct DemoSource {
    active: bool,
    start_time: Option<Instant>,
    sample_count: u64,
    circuit: Vec<LapPhase>,
    lap_duration: f64,
    laps_completed: u32,
    last_lap: f64,
}

impl DemoSource {
    pub fn new() -> Self {
        let circuit = demo_circuit();
        let lap_duration: f64 = circuit.iter().map(|p| p.duration).sum();
        Self {
            active: false,
            start_time: None,
            sample_count: 0,
            circuit,
            lap_duration,
            laps_completed: 0,
            last_lap: 0.0,
        }
    }

    fn generate_sample(&mut self) -> TelemetrySample {
        let elapsed = self.start_time.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);

        self.sample_count += 1;
        let n = self.sample_count as f64;

        let lap_time = elapsed % self.lap_duration;
        let lap_number = (elapsed / self.lap_duration) as u32 + 1;
        if lap_number > self.laps_completed + 1 {
            self.laps_completed = lap_number - 1;
            self.last_lap = self.lap_duration + jitter(n, 1.5);
        }

        let state = compute_phase_state(&self.circuit, lap_time);

        let speed = (state.speed + jitter(n, 0.3)).max(0.0);
        let rpm = (state.rpm + jitter(n * 1.1, 30.0)).clamp(1200.0, 8000.0);
        let throttle = (state.throttle + jitter(n * 1.2, 0.02)).clamp(0.0, 1.0);
        let brake = (state.brake + jitter(n * 1.3, 0.02)).clamp(0.0, 1.0);
        let steering = state.steering + jitter(n * 1.4, 0.005);
        let lat_g = state.lateral_g + jitter(n * 1.5, 0.05);
        let long_g = state.longitudinal_g + jitter(n * 1.6, 0.03);

        // Yaw rate follows steering and speed closely enough that the
        // handling detector sees a neutral car.
        let yaw_rate = steering * (speed / 100.0) * 0.5 + jitter(n * 1.7, 0.002);

        let lateral_velocity = lat_g * 0.6;
        let heat = speed * 0.15 + lat_g.abs() * 3.0;
        let fuel = (60.0 * (1.0 - elapsed * 0.000_15)).max(0.0);

        TelemetrySample {
            timestamp: elapsed,
            lap: lap_number,
            lap_dist_pct: lap_time / self.lap_duration,
            speed_mps: speed,
            rpm,
            gear: state.gear,
            throttle,
            brake,
            steering_rad: steering,
            yaw_rate_rps: yaw_rate,
            lat_accel_g: lat_g,
            long_accel_g: long_g,
            vert_accel_g: -1.0 + jitter(n * 1.8, 0.02),
            velocity_x_mps: speed,
            velocity_y_mps: lateral_velocity,
            tire_pressures_kpa: [
                178.0 + heat * 0.3 + jitter(n * 2.1, 0.5),
                178.0 + heat * 0.3 + jitter(n * 2.2, 0.5),
                172.0 + heat * 0.25 + jitter(n * 2.3, 0.5),
                172.0 + heat * 0.25 + jitter(n * 2.4, 0.5),
            ],
            tire_temps_c: Some([
                85.0 + heat + jitter(n * 2.5, 0.5),
                85.0 + heat + jitter(n * 2.6, 0.5),
                78.0 + heat + jitter(n * 2.7, 0.5),
                78.0 + heat + jitter(n * 2.8, 0.5),
            ]),
            fuel_level_l: fuel,
            fuel_use_per_hour_l: 30.0 + throttle * 15.0,
            on_pit_road: false,
            track_surface: TrackSurface::OnTrack,
            session_phase: SessionPhase::Racing,
            session_flags: 0,
            last_lap_time_s: (self.laps_completed > 0).then_some(self.last_lap),
            current_lap_time_s: Some(lap_time),
            track_name: Some("Demo Circuit".to_string()),
            car_name: Some("Formula Demo".to_string()),
        }
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetrySource for DemoSource {
    fn key(&self) -> &str {
        "demo"
    }

    fn name(&self) -> &str {
        "Demo"
    }

    fn detect(&self) -> bool {
        true
    }

    fn start(&mut self) -> Result<()> {
        self.active = true;
        self.start_time = Some(Instant::now());
        self.sample_count = 0;
        self.laps_completed = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.active = false;
        self.start_time = None;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<TelemetrySample>> {
        if !self.active {
            return Ok(None);
        }
        Ok(Some(self.generate_sample()))
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
