//! Error taxonomy
//!
//! Detectors and the micro-analyzer never raise; they return empty results.
//! These kinds exist for the I/O boundaries: sources, persistence, the LLM
//! transport and startup configuration. The pipeline is loss-tolerant:
//! dropping a single insight or message is always preferable to stalling.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    /// The simulator SDK is unreachable or the connection dropped.
    #[error("telemetry source unavailable: {0}")]
    SourceUnavailable(String),

    /// A sample failed validation at the ingest boundary.
    #[error("malformed sample: {0}")]
    MalformedSample(String),

    /// Persistence read/write failure; state is retained in memory and the
    /// write retried at session close.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// Persisted JSON could not be parsed.
    #[error("corrupt persisted data: {0}")]
    CorruptData(#[from] serde_json::Error),

    /// Transient LLM failure (timeout, rate limit, network); the caller
    /// falls back to the local message.
    #[error("llm transient failure: {0}")]
    LlmTransient(String),

    /// Hard LLM failure (auth/config); enrichment is disabled for the
    /// session and logged once.
    #[error("llm unavailable: {0}")]
    LlmHard(String),

    /// Startup configuration is invalid; fail fast.
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoachError {
    /// True when the LLM failure should disable enrichment for the rest of
    /// the session rather than fall back once.
    pub fn is_llm_hard(&self) -> bool {
        matches!(self, Self::LlmHard(_))
    }
}
