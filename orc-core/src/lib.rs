//! OpenRaceCoach Core Library
//!
//! This crate provides the unified telemetry model, the sliding-window
//! telemetry ring, the frozen coaching configuration, the error taxonomy
//! and the telemetry source trait shared by the coaching pipeline and the
//! server.

pub mod buffer;
pub mod config;
pub mod error;
pub mod model;
pub mod source;
pub mod units;

pub use buffer::TelemetryRing;
pub use config::CoachConfig;
pub use error::CoachError;
pub use model::{CoachingMessage, PatternInsight, TelemetrySample};
pub use source::TelemetrySource;
