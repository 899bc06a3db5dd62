//! Environment-driven configuration for the orchestration runtime.
//!
//! Every knob has a documented default and is resolved once, at process
//! start, into an immutable [`AppConfig`]. Nothing in the runtime mutates
//! it afterward; components that need different values per call (per-agent
//! token ceilings, for instance) read them out of this struct at
//! construction time.

use crate::error::{Error, Result};
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resolved configuration for the orchestration runtime.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// The out-of-scope model provider this process talks to for every
    /// orchestrator/coordinator decision (routing, termination, synthesis).
    pub model_endpoint: String,
    pub model_api_key: String,
    pub model_deployment_name: String,

    /// Seed list of specialist base URLs, fed to C3 discovery at startup.
    pub specialist_base_urls: Vec<String>,

    /// C1 tuning.
    pub max_concurrent_requests: usize,
    pub requests_per_minute: u32,
    pub tokens_per_minute: u32,
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_recovery_timeout: Duration,

    /// C2 tuning.
    pub agent_max_tokens: usize,

    /// C7 tuning.
    pub max_research_rounds: u32,

    /// `server` bind address.
    pub server_bind_addr: String,
}

impl AppConfig {
    /// Resolve configuration from the process environment, applying the
    /// defaults documented in the external interfaces section.
    pub fn from_env() -> Result<Self> {
        let model_endpoint = std::env::var("MODEL_ENDPOINT")
            .map_err(|_| Error::config("MODEL_ENDPOINT is required"))?;
        let model_api_key = env_string("MODEL_API_KEY", "");
        let model_deployment_name = env_string("MODEL_DEPLOYMENT_NAME", "default");

        let specialist_base_urls = std::env::var("SPECIALIST_BASE_URLS")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_retries = env_parsed("MAX_RETRIES", 3u32);
        let initial_backoff_secs = env_parsed("INITIAL_BACKOFF_SECONDS", 1.0f64);
        let max_backoff_secs = env_parsed("MAX_BACKOFF_SECONDS", 60.0f64);
        let recovery_timeout_secs = env_parsed("CIRCUIT_BREAKER_RECOVERY_TIMEOUT", 10.0f64);

        Ok(Self {
            model_endpoint,
            model_api_key,
            model_deployment_name,
            specialist_base_urls,
            max_concurrent_requests: env_parsed("MAX_CONCURRENT_REQUESTS", 5usize),
            requests_per_minute: env_parsed("REQUESTS_PER_MINUTE", 60u32),
            tokens_per_minute: env_parsed("TOKENS_PER_MINUTE", 90_000u32),
            max_retries,
            initial_backoff: Duration::from_secs_f64(initial_backoff_secs),
            max_backoff: Duration::from_secs_f64(max_backoff_secs),
            circuit_breaker_failure_threshold: env_parsed(
                "CIRCUIT_BREAKER_FAILURE_THRESHOLD",
                5u32,
            ),
            circuit_breaker_recovery_timeout: Duration::from_secs_f64(recovery_timeout_secs),
            agent_max_tokens: env_parsed("AGENT_MAX_TOKENS", 4096usize),
            max_research_rounds: env_parsed("MAX_RESEARCH_ROUNDS", 12u32),
            server_bind_addr: env_string("SERVER_BIND_ADDR", "0.0.0.0:8080"),
        })
    }

    /// The minimum spacing between consecutive outbound requests implied by
    /// `requests_per_minute`, matching the source's fairness pacing.
    pub fn min_request_interval(&self) -> Duration {
        if self.requests_per_minute == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(60.0 / self.requests_per_minute as f64)
    }

    /// Construct a config directly from values, bypassing the environment.
    /// Used by tests and by callers embedding this crate as a library.
    pub fn for_testing(model_endpoint: impl Into<String>) -> Self {
        Self {
            model_endpoint: model_endpoint.into(),
            model_api_key: String::new(),
            model_deployment_name: "default".into(),
            specialist_base_urls: Vec::new(),
            max_concurrent_requests: 5,
            requests_per_minute: 60,
            tokens_per_minute: 90_000,
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            circuit_breaker_failure_threshold: 5,
            circuit_breaker_recovery_timeout: Duration::from_secs(10),
            agent_max_tokens: 4096,
            max_research_rounds: 12,
            server_bind_addr: "127.0.0.1:0".into(),
        }
    }
}
