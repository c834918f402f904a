//! Resilience policies around provider calls
//!
//! Retry wraps the circuit breaker, which wraps the raw call. A rejection from an open
//! breaker is retryable, so it consumes one attempt instead of looping. Streamed calls
//! settle the breaker only once the stream has resolved.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerConfig, CircuitBreaker, CircuitState};
pub use retry::{RetryConfig, RetryPolicy};

use crate::error::ApiError;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Retry + circuit breaking for one kind of call
#[derive(Debug, Clone)]
pub struct ResilientCaller {
    retry: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl ResilientCaller {
    pub fn new(retry: RetryPolicy, breaker: Option<Arc<CircuitBreaker>>) -> Self {
        Self { retry, breaker }
    }

    /// Build from configuration. The breaker is shared, so callers built from the same
    /// `Arc` observe the same failure counts.
    pub fn from_config(
        retry: &RetryConfig,
        breaker_config: &BreakerConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let breaker = breaker_config.enabled.then_some(breaker);
        Self::new(RetryPolicy::from_config(retry), breaker)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the attempt budget
    /// is spent. `operation` receives the 1-based attempt number. A success is
    /// recorded on the breaker as soon as `operation` returns.
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let (value, outcome) = self.open(operation).await?;
        outcome.succeeded();
        Ok(value)
    }

    /// Like [`call`](Self::call), but a successful open is not yet a success: the
    /// caller settles the returned [`PendingOutcome`] once the call has resolved.
    /// Failures of the open itself are recorded here.
    pub async fn open<F, Fut, T>(&self, mut operation: F) -> Result<(T, PendingOutcome), ApiError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 1;
        loop {
            let result = match self.admit() {
                Ok(()) => match operation(attempt).await {
                    Ok(value) => Ok(value),
                    Err(err) => {
                        self.record_failure();
                        Err(err)
                    }
                },
                Err(rejected) => Err(rejected),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Provider call succeeded after retry");
                    }
                    let outcome = PendingOutcome {
                        breaker: self.breaker.clone(),
                    };
                    return Ok((value, outcome));
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn admit(&self) -> Result<(), ApiError> {
        match &self.breaker {
            Some(breaker) => breaker.try_acquire(),
            None => Ok(()),
        }
    }

    fn record_failure(&self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
    }
}

/// Breaker bookkeeping for a call that was opened but has not resolved yet, such as
/// a stream that can still fail part way. Dropping it unsettled records nothing.
#[derive(Debug)]
#[must_use = "settle the outcome so the breaker sees how the call ended"]
pub struct PendingOutcome {
    breaker: Option<Arc<CircuitBreaker>>,
}

impl PendingOutcome {
    pub fn succeeded(self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_success();
        }
    }

    pub fn failed(self) {
        if let Some(breaker) = &self.breaker {
            breaker.record_failure();
        }
    }
}

impl Default for ResilientCaller {
    fn default() -> Self {
        Self::from_config(
            &RetryConfig::default(),
            &BreakerConfig::default(),
            Arc::new(CircuitBreaker::from_config(&BreakerConfig::default())),
        )
    }
}
