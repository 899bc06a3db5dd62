//! Resilient Call Wrapper (C1).
//!
//! Wraps every outbound call to the model provider or a remote specialist
//! with, in order: a circuit-breaker check, a rate-limit wait, a
//! concurrency-semaphore acquire, a minimum-inter-request-interval wait,
//! and a retry-with-backoff loop around the call itself. [`ResilientCaller`]
//! can be shared process-wide (`shared`) for global fairness, or built
//! fresh per call site (`new`) for per-agent isolation — both paths run
//! the identical [`ResilientCaller::execute`] algorithm.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::retry::RetryConfig;
use crate::tokens::TokenAccountant;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};

const SUCCESS_THRESHOLD: u32 = 3;
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Three-state circuit breaker: closed, open, half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

struct CircuitInner {
    state: CircuitStateKind,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

/// Process-wide (or per-agent, if isolated) circuit breaker.
pub struct CircuitBreaker {
    inner: Mutex<CircuitInner>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(CircuitInner {
                state: CircuitStateKind::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            failure_threshold,
            recovery_timeout,
        }
    }

    pub async fn state(&self) -> CircuitStateKind {
        self.inner.lock().await.state
    }

    /// Admit or reject a call. Transitions `open` -> `half_open` once the
    /// recovery timeout has elapsed, as a side effect of this check.
    async fn admit(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitStateKind::Closed | CircuitStateKind::HalfOpen => Ok(()),
            CircuitStateKind::Open => {
                let elapsed = inner.last_failure.map(|t| t.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitStateKind::HalfOpen;
                    inner.success_count = 0;
                    Ok(())
                } else {
                    Err(Error::circuit_open(self.recovery_timeout - elapsed))
                }
            }
        }
    }

    async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        match inner.state {
            CircuitStateKind::Closed => {
                inner.failure_count = 0;
            }
            CircuitStateKind::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= SUCCESS_THRESHOLD {
                    inner.state = CircuitStateKind::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                }
            }
            CircuitStateKind::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitStateKind::HalfOpen => {
                inner.state = CircuitStateKind::Open;
                inner.success_count = 0;
            }
            CircuitStateKind::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitStateKind::Open;
                }
            }
            CircuitStateKind::Open => {}
        }
    }
}

/// Sliding-window request/token rate tracker plus the in-flight semaphore.
pub struct RateTracker {
    requests_per_minute: u32,
    tokens_per_minute: u32,
    requests: Mutex<VecDeque<Instant>>,
    tokens: Mutex<VecDeque<(Instant, usize)>>,
    semaphore: Arc<Semaphore>,
}

impl RateTracker {
    pub fn new(requests_per_minute: u32, tokens_per_minute: u32, max_concurrent: usize) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
            requests: Mutex::new(VecDeque::new()),
            tokens: Mutex::new(VecDeque::new()),
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    fn prune(window: &mut VecDeque<Instant>) {
        let cutoff = Instant::now().checked_sub(RATE_WINDOW).unwrap_or_else(Instant::now);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
    }

    fn prune_tokens(window: &mut VecDeque<(Instant, usize)>) {
        let cutoff = Instant::now().checked_sub(RATE_WINDOW).unwrap_or_else(Instant::now);
        while window.front().is_some_and(|(t, _)| *t < cutoff) {
            window.pop_front();
        }
    }

    /// Suspend (re-checking periodically) until both the request-count and
    /// token-budget windows have room for `estimated_tokens`.
    pub async fn wait_for_capacity(&self, estimated_tokens: usize) {
        loop {
            let mut requests = self.requests.lock().await;
            Self::prune(&mut requests);
            let mut tokens = self.tokens.lock().await;
            Self::prune_tokens(&mut tokens);

            let tokens_in_window: usize = tokens.iter().map(|(_, n)| n).sum();
            let requests_ok = (requests.len() as u32) < self.requests_per_minute;
            let tokens_ok = tokens_in_window + estimated_tokens <= self.tokens_per_minute as usize;

            if requests_ok && tokens_ok {
                return;
            }

            // Wait until the oldest entry in whichever window is over
            // capacity falls out of the 60s horizon.
            let oldest = requests.front().copied().into_iter().chain(
                tokens.front().map(|(t, _)| *t),
            ).min();
            drop(tokens);
            drop(requests);

            let wait = match oldest {
                Some(t) => RATE_WINDOW
                    .checked_sub(t.elapsed())
                    .unwrap_or(Duration::from_millis(50)),
                None => Duration::from_millis(50),
            };
            tokio::time::sleep(wait.max(Duration::from_millis(10))).await;
        }
    }

    async fn record_request(&self, tokens: usize) {
        let now = Instant::now();
        self.requests.lock().await.push_back(now);
        self.tokens.lock().await.push_back((now, tokens));
    }
}

/// Combines the circuit breaker, rate tracker, retry loop, and minimum
/// inter-request pacing.
pub struct ResilientCaller {
    circuit: CircuitBreaker,
    rate: RateTracker,
    retry: RetryConfig,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    accountant: Arc<TokenAccountant>,
}

impl ResilientCaller {
    /// Construct an isolated caller from config; not shared unless the
    /// caller wraps it in an `Arc` itself.
    pub fn new(config: &AppConfig, accountant: Arc<TokenAccountant>) -> Self {
        Self {
            circuit: CircuitBreaker::new(
                config.circuit_breaker_failure_threshold,
                config.circuit_breaker_recovery_timeout,
            ),
            rate: RateTracker::new(
                config.requests_per_minute,
                config.tokens_per_minute,
                config.max_concurrent_requests,
            ),
            retry: RetryConfig::new()
                .with_max_attempts(config.max_retries)
                .with_initial_delay(config.initial_backoff)
                .with_max_delay(config.max_backoff),
            min_interval: config.min_request_interval(),
            last_request: Mutex::new(None),
            accountant,
        }
    }

    /// Construct a process-wide shared caller, ready to be cloned via `Arc`.
    pub fn shared(config: &AppConfig, accountant: Arc<TokenAccountant>) -> Arc<Self> {
        Arc::new(Self::new(config, accountant))
    }

    pub async fn circuit_state(&self) -> CircuitStateKind {
        self.circuit.state().await
    }

    /// Run `f` under the full C1 algorithm. `context_label` identifies the
    /// call site in the usage ledger (a specialist name, `"routing"`, etc).
    pub async fn execute<F, Fut, T>(
        &self,
        context_label: &str,
        estimated_tokens: usize,
        mut f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.circuit.admit().await?;
        self.rate.wait_for_capacity(estimated_tokens).await;

        let _permit = self
            .rate
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::internal("semaphore closed"))?;

        self.enforce_min_interval().await;

        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 0..max_attempts {
            match f().await {
                Ok(value) => {
                    self.rate.record_request(estimated_tokens).await;
                    self.accountant
                        .record(context_label, estimated_tokens, estimated_tokens, false);
                    self.circuit.record_success().await;
                    return Ok(value);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    let retryable = err.is_retryable_by_message();
                    let exhausted = attempt + 1 == max_attempts;
                    if !retryable || exhausted {
                        if err.counts_as_breaker_failure() {
                            self.circuit.record_failure().await;
                        }
                        return Err(err);
                    }
                    let delay = self.retry.calculate_delay(attempt);
                    last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::internal("execute loop exited without result")))
    }

    async fn enforce_min_interval(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> AppConfig {
        let mut cfg = AppConfig::for_testing("http://localhost:1234");
        cfg.max_retries = 3;
        cfg.initial_backoff = Duration::from_millis(5);
        cfg.max_backoff = Duration::from_millis(20);
        cfg.requests_per_minute = 1000;
        cfg.tokens_per_minute = 1_000_000;
        cfg.max_concurrent_requests = 4;
        cfg.circuit_breaker_failure_threshold = 3;
        cfg.circuit_breaker_recovery_timeout = Duration::from_millis(50);
        cfg
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt_and_closes_circuit() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));
        let result = caller.execute("test", 10, || async { Ok::<_, Error>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(caller.circuit_state().await, CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn retries_retryable_errors_then_succeeds() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = caller
            .execute("test", 10, move || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(Error::upstream_unavailable("503 Service Unavailable"))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_fails_fast_without_retry() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();

        let result = caller
            .execute("test", 10, move || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(Error::bad_request("malformed"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_failures_and_rejects_without_calling() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls_clone = calls.clone();
            let _ = caller
                .execute("test", 10, move || {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<i32, _>(Error::upstream_unavailable("500 always fails"))
                    }
                })
                .await;
        }

        assert_eq!(caller.circuit_state().await, CircuitStateKind::Open);

        let calls_before = calls.load(Ordering::SeqCst);
        let calls_clone = calls.clone();
        let result = caller
            .execute("test", 10, move || {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<i32, Error>(1)
                }
            })
            .await;

        assert!(matches!(result, Err(Error::CircuitOpen { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), calls_before, "breaker must reject without invoking fn");
    }

    #[tokio::test]
    async fn circuit_recovers_to_half_open_then_closed_after_success_threshold() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));

        for _ in 0..3 {
            let _ = caller
                .execute("test", 10, || async { Err::<i32, _>(Error::upstream_unavailable("500")) })
                .await;
        }
        assert_eq!(caller.circuit_state().await, CircuitStateKind::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        for _ in 0..3 {
            let result = caller.execute("test", 10, || async { Ok::<_, Error>(1) }).await;
            assert!(result.is_ok());
        }
        assert_eq!(caller.circuit_state().await, CircuitStateKind::Closed);
    }

    #[tokio::test]
    async fn cancellation_is_not_retried_and_not_a_breaker_failure() {
        let caller = ResilientCaller::new(&test_config(), Arc::new(TokenAccountant::new()));
        let result = caller
            .execute("test", 10, || async { Err::<i32, _>(Error::Cancelled) })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(caller.circuit_state().await, CircuitStateKind::Closed);
    }
}
