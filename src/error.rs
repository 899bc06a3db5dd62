//! Error types for the orchestration runtime
//!
//! [`Error`] realizes the error taxonomy the rest of the crate dispatches on:
//! the resilient call wrapper (`resilience`) retries or escalates based on
//! which variant it sees, and `server` maps every variant to exactly one
//! HTTP status so upstream failure detail never leaks to a caller.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid user input. Surfaced as HTTP 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Remote tool or model returned 5xx, timed out, or was rejected by the
    /// circuit breaker. Retried internally; this variant is only ever
    /// observed by a caller after retries are exhausted.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A specialist answered with a JSON-RPC `error` body. Not retried.
    #[error("Error delegating to {agent}: {message}")]
    UpstreamClientError { agent: String, message: String },

    /// Rate tracker rejected the request. Always retryable.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The circuit breaker rejected the call outright without attempting it.
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// Specialist or model output was not valid JSON where JSON was expected.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The call was cancelled at a suspension point. No retry, no breaker update.
    #[error("cancelled")]
    Cancelled,

    /// HTTP transport error, generally wrapped into `UpstreamUnavailable`
    /// by the resilient call wrapper before it escalates further.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Unexpected internal failure. Surfaced as a sanitized HTTP 500.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Error::BadRequest(msg.into())
    }

    pub fn upstream_unavailable(msg: impl Into<String>) -> Self {
        Error::UpstreamUnavailable(msg.into())
    }

    pub fn upstream_client_error(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Error::UpstreamClientError {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Error::RateLimited { retry_after }
    }

    pub fn circuit_open(retry_after: Duration) -> Self {
        Error::CircuitOpen { retry_after }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Error::ParseError(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::InternalError(msg.into())
    }

    /// Whether this error, by its message content, should be retried by C1.
    /// Classifies an error by matching known-transient substrings in its message.
    pub fn is_retryable_by_message(&self) -> bool {
        const RETRYABLE_SUBSTRINGS: &[&str] = &[
            "rate limit",
            "429",
            "500",
            "502",
            "503",
            "504",
            "timeout",
            "service unavailable",
        ];
        let text = self.to_string().to_lowercase();
        RETRYABLE_SUBSTRINGS.iter().any(|s| text.contains(s))
    }

    /// Whether this error counts as a circuit-breaker failure at all.
    /// Cancellation and client-side bad input never do.
    pub fn counts_as_breaker_failure(&self) -> bool {
        !matches!(self, Error::Cancelled | Error::BadRequest(_))
    }

    /// Sanitized message safe to return to an external caller.
    pub fn user_safe_message(&self) -> String {
        match self {
            Error::BadRequest(m) => m.clone(),
            Error::UpstreamClientError { agent, message } => {
                format!("Error delegating to {agent}: {message}")
            }
            Error::RateLimited { .. } => "The service is busy, please try again shortly.".into(),
            Error::CircuitOpen { .. } => {
                "A dependency is temporarily unavailable, please try again shortly.".into()
            }
            Error::Cancelled => "The request was cancelled.".into(),
            _ => "An internal error occurred.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_request_is_400_shaped() {
        let err = Error::bad_request("question is required");
        assert!(matches!(err, Error::BadRequest(_)));
        assert_eq!(err.to_string(), "bad request: question is required");
    }

    #[test]
    fn upstream_client_error_matches_spec_format() {
        let err = Error::upstream_client_error("ADXAgent", "connection refused");
        assert_eq!(
            err.to_string(),
            "Error delegating to ADXAgent: connection refused"
        );
    }

    #[test]
    fn retryable_classification_matches_substrings() {
        assert!(Error::upstream_unavailable("HTTP 503 Service Unavailable").is_retryable_by_message());
        assert!(Error::upstream_unavailable("rate limit exceeded").is_retryable_by_message());
        assert!(Error::upstream_unavailable("request timeout").is_retryable_by_message());
        assert!(!Error::upstream_unavailable("malformed payload").is_retryable_by_message());
    }

    #[test]
    fn cancellation_and_bad_request_never_count_as_breaker_failures() {
        assert!(!Error::Cancelled.counts_as_breaker_failure());
        assert!(!Error::bad_request("x").counts_as_breaker_failure());
        assert!(Error::upstream_unavailable("boom").counts_as_breaker_failure());
    }

    #[test]
    fn user_safe_message_never_echoes_raw_internal_detail() {
        let err = Error::InternalError("panic at src/foo.rs:42: secret=abc".into());
        assert_eq!(err.user_safe_message(), "An internal error occurred.");
    }

    #[test]
    fn from_reqwest_and_serde_json_conversions_compile() {
        fn _from_json(e: serde_json::Error) -> Error {
            e.into()
        }
    }
}
