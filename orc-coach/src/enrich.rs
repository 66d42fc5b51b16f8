//! LLM enrichment
//!
//! Optionally rewrites a coaching message using a remote model over a
//! structured context payload. The enricher never fails the pipeline: on
//! timeout, transport error, rate limiting, disabled state or empty model
//! output it returns the original local message unchanged. A hard failure
//! (auth/config) disables enrichment for the rest of the session and is
//! logged once.

use async_trait::async_trait;
use orc_core::config::LlmConfig;
use orc_core::error::CoachError;
use orc_core::model::{
    CoachingMessage, MessageSource, PatternInsight, TelemetrySample,
};
use orc_core::units::mps_to_kph;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{info, warn};

/// One prior event in the context history.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEvent {
    pub lap: u32,
    pub turn: String,
    pub event: String,
    pub severity: String,
}

/// Session figures carried into the payload.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionFigures {
    #[serde(rename = "type")]
    pub session_type: String,
    pub lap_number: u32,
    pub fuel_remaining_l: f64,
    pub best_lap_time: Option<f64>,
    pub current_lap_time: Option<f64>,
}

/// Everything the payload builder needs from the pipeline.
#[derive(Debug, Clone)]
pub struct EnrichContext {
    /// The most recent samples, oldest first (the payload uses the last 20).
    pub recent_samples: Vec<TelemetrySample>,
    pub track_name: String,
    pub turn_name: String,
    pub segment_name: String,
    pub best_apex_speed_kph: f64,
    pub driver_apex_speed_kph: f64,
    pub sector_delta_s: f64,
    pub session: SessionFigures,
}

/// Reply from a chat backend.
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub content: String,
    pub audio: Option<String>,
    pub tokens_used: u32,
}

/// Transport seam; the production implementation speaks an OpenAI-style
/// chat API, tests plug in canned backends.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatReply, CoachError>;
}

/// OpenAI-compatible chat completion backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(base_url: String, api_key: String, model: String) -> Self {
        Self { client: reqwest::Client::new(), base_url, api_key, model }
    }

    /// Build from the environment (`OPENAI_API_KEY`); `None` when no key is
    /// configured.
    pub fn from_env(config: &LlmConfig) -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())?;
        Some(Self::new(config.base_url.clone(), api_key, config.model.clone()))
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(
        &self,
        system: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<ChatReply, CoachError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": prompt},
            ],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoachError::LlmTransient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(CoachError::LlmHard(format!("authentication failed ({status})")));
        }
        if !status.is_success() {
            return Err(CoachError::LlmTransient(format!("status {status}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CoachError::LlmTransient(e.to_string()))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .trim()
            .to_string();
        let tokens_used = value["usage"]["total_tokens"].as_u64().unwrap_or(0) as u32;
        Ok(ChatReply { content, audio: None, tokens_used })
    }
}

/// Sliding-window request limiter.
pub struct RateLimiter {
    max_requests: usize,
    window_s: f64,
    requests: VecDeque<f64>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_s: f64) -> Self {
        Self { max_requests, window_s, requests: VecDeque::new() }
    }

    pub fn can_request(&mut self, now: f64) -> bool {
        while self.requests.front().map(|t| now - t > self.window_s).unwrap_or(false) {
            self.requests.pop_front();
        }
        self.requests.len() < self.max_requests
    }

    pub fn record(&mut self, now: f64) {
        self.requests.push_back(now);
    }
}

pub struct Enricher {
    config: LlmConfig,
    backend: Option<Box<dyn ChatBackend>>,
    limiter: RateLimiter,
    history: VecDeque<HistoryEvent>,
    /// Set after a hard failure; logged once.
    disabled_for_session: bool,
}

impl Enricher {
    pub fn new(config: LlmConfig, backend: Option<Box<dyn ChatBackend>>) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_per_min, 60.0);
        Self {
            config,
            backend,
            limiter,
            history: VecDeque::with_capacity(8),
            disabled_for_session: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.config.enabled && self.backend.is_some() && !self.disabled_for_session
    }

    /// Rewrite `fallback` through the model; any failure returns `fallback`
    /// unchanged.
    pub async fn enrich(
        &mut self,
        fallback: CoachingMessage,
        insight: &PatternInsight,
        context: &EnrichContext,
        now: f64,
    ) -> CoachingMessage {
        if !self.is_available() {
            return fallback;
        }
        if !self.limiter.can_request(now) {
            return fallback;
        }

        let payload = build_payload(insight, context, &self.history());
        let prompt = format!(
            "Telemetry context:\n{}\n\nDraft advice: \"{}\"\n\nRewrite this as one or two short, specific coaching sentences. \
             Refer to the corner by name. Reply with the advice only.",
            payload, fallback.content
        );
        let system = "You are an expert racing coach giving real-time advice over the radio. \
                      Be concise, direct and specific.";

        self.limiter.record(now);
        self.record_event(insight, context);

        let timeout = Duration::from_secs_f64(self.config.text_timeout_s);
        let Some(backend) = self.backend.as_ref() else {
            return fallback;
        };
        let result = tokio::time::timeout(
            timeout,
            backend.complete(system, &prompt, self.config.max_tokens, self.config.temperature),
        )
        .await;

        match result {
            Ok(Ok(reply)) if !reply.content.is_empty() => {
                let mut message = fallback;
                message.content = reply.content;
                message.source = MessageSource::Remote;
                message.confidence = message.confidence.max(self.config.confidence_floor);
                message.audio = reply.audio;
                message
            }
            Ok(Ok(_)) => {
                warn!("llm returned empty content; using local message");
                fallback
            }
            Ok(Err(e)) if e.is_llm_hard() => {
                // Logged once; further requests short-circuit.
                warn!(error = %e, "llm hard failure; disabling enrichment for this session");
                self.disabled_for_session = true;
                fallback
            }
            Ok(Err(e)) => {
                info!(error = %e, "llm transient failure; using local message");
                fallback
            }
            Err(_) => {
                info!("llm request timed out; using local message");
                fallback
            }
        }
    }

    fn record_event(&mut self, insight: &PatternInsight, context: &EnrichContext) {
        self.history.push_back(HistoryEvent {
            lap: context.session.lap_number,
            turn: context.turn_name.clone(),
            event: insight.situation.key().to_string(),
            severity: severity_label(insight.importance).to_string(),
        });
        if self.history.len() > 5 {
            self.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<HistoryEvent> {
        self.history.iter().cloned().collect()
    }
}

fn severity_label(importance: f64) -> &'static str {
    if importance > 0.7 {
        "high"
    } else if importance > 0.4 {
        "medium"
    } else {
        "low"
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Structured context payload: event, the last 20 samples of driver inputs
/// and car state as parallel arrays, tire state, reference figures, the
/// last ≤ 5 prior events and session figures.
pub fn build_payload(
    insight: &PatternInsight,
    context: &EnrichContext,
    history: &[HistoryEvent],
) -> serde_json::Value {
    let samples: Vec<&TelemetrySample> =
        context.recent_samples.iter().rev().take(20).rev().collect();

    let steering: Vec<f64> = samples.iter().map(|s| round_to(s.steering_rad, 2)).collect();
    let brake: Vec<f64> = samples.iter().map(|s| round_to(s.brake, 3)).collect();
    let throttle: Vec<f64> = samples.iter().map(|s| round_to(s.throttle, 3)).collect();
    let gear: Vec<i8> = samples.iter().map(|s| s.gear).collect();

    let speed_kph: Vec<f64> = samples.iter().map(|s| round_to(mps_to_kph(s.speed_mps), 1)).collect();
    let rpm: Vec<f64> = samples.iter().map(|s| s.rpm.round()).collect();
    let slip_angle: Vec<f64> = samples.iter().map(|s| round_to(s.slip_angle(), 3)).collect();

    let temps: Vec<f64> = samples
        .last()
        .and_then(|s| s.tire_temps_c)
        .map(|t| t.to_vec())
        .unwrap_or_default();
    let pressures: Vec<f64> =
        samples.last().map(|s| s.tire_pressures_kpa.to_vec()).unwrap_or_default();

    json!({
        "event": {
            "type": insight.situation.key(),
            "severity": severity_label(insight.importance),
            "location": {
                "track": &context.track_name,
                "turn": &context.turn_name,
                "segment": &context.segment_name,
            },
            "time": samples.last().map(|s| s.timestamp).unwrap_or(0.0),
        },
        "driver_inputs": {
            "steering_angle": steering,
            "brake": brake,
            "throttle": throttle,
            "gear": gear,
        },
        "car_state": {
            "speed_kph": speed_kph,
            "rpm": rpm,
            "slip_angle": slip_angle,
        },
        "tire_state": {
            "temps": temps,
            "pressures": pressures,
        },
        "reference": {
            "best_apex_speed": context.best_apex_speed_kph,
            "driver_apex_speed": context.driver_apex_speed_kph,
            "sector_delta_s": context.sector_delta_s,
        },
        "history": history,
        "session": &context.session,
    })
}
