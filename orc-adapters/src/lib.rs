//! Telemetry sources for OpenRaceCoach

pub mod demo;

pub use demo::DemoSource;
