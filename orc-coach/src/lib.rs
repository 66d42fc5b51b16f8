//! OpenRaceCoach coaching pipeline
//!
//! The stages between "a telemetry sample arrives" and "coaching messages
//! are ready for delivery": ingest and ring buffering, lap/sector
//! detection, segment location, pattern detectors, corner micro-analysis,
//! mistake tracking, reference management, the coaching decider, the
//! message queue, LLM enrichment and session persistence.

pub mod decider;
pub mod detectors;
pub mod engine;
pub mod enrich;
pub mod ingest;
pub mod laps;
pub mod micro;
pub mod mistakes;
pub mod persist;
pub mod queue;
pub mod reference;
pub mod segments;
pub mod session;

pub use engine::{CoachingEngine, EnrichRequest, StepOutput};
pub use queue::MessageQueue;
