//! Retry and circuit breaking across jobs

use super::test_utils::orchestrator_with_breaker;
use futures::StreamExt;
use genstream::error::{ApiError, ProviderError};
use genstream::jobs::{JobParams, JobState};
use genstream::orchestrator::{Orchestrator, PROVIDER_UNAVAILABLE_MESSAGE};
use genstream::progress::ProgressEvent;
use genstream::provider::{ProviderWireEvent, ScriptedCall, ScriptedProvider};
use genstream::resilience::{CircuitBreaker, CircuitState, ResilientCaller, RetryPolicy};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn server_error() -> ScriptedCall {
    ScriptedCall::Fail(ProviderError::Status {
        status: 500,
        message: "internal".to_string(),
    })
}

fn failed_midway() -> ScriptedCall {
    ScriptedCall::Respond(vec![
        ProviderWireEvent::TextDelta("partial".to_string()),
        ProviderWireEvent::Failed("overloaded".to_string()),
    ])
}

async fn run_job(orchestrator: &Arc<Orchestrator>) -> (String, Vec<ProgressEvent>) {
    let id = orchestrator
        .registry()
        .create_job(JobParams::new("prompt", "gpt-4.1"));
    let events = orchestrator.stream(id.as_str()).collect().await;
    (id, events)
}

#[tokio::test(start_paused = true)]
async fn test_shared_breaker_fails_fast_then_recovers() {
    let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(60)));
    let (orchestrator, provider) = orchestrator_with_breaker(
        ScriptedProvider::new(vec![
            server_error(),
            server_error(),
            ScriptedCall::text_response(&["back"]),
            ScriptedCall::text_response(&["again"]),
        ]),
        RetryPolicy::disabled(),
        Some(breaker.clone()),
    );

    for _ in 0..2 {
        let (id, _) = run_job(&orchestrator).await;
        assert_eq!(
            orchestrator.registry().get_job(&id).unwrap().state,
            JobState::Error
        );
    }
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(orchestrator.breaker_state(), Some(CircuitState::Open));

    let (_, events) = run_job(&orchestrator).await;
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Failure {
            message: PROVIDER_UNAVAILABLE_MESSAGE.to_string(),
            code: None,
        })
    );
    assert_eq!(provider.attempts(), 2);

    tokio::time::advance(Duration::from_secs(61)).await;

    let (first, _) = run_job(&orchestrator).await;
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
    let (second, _) = run_job(&orchestrator).await;
    assert_eq!(breaker.state(), CircuitState::Closed);
    for id in [first, second] {
        assert_eq!(
            orchestrator.registry().get_job(&id).unwrap().state,
            JobState::Completed
        );
    }
    assert_eq!(provider.attempts(), 4);
}

/// Streams that open fine and then report failure count against the breaker, the same
/// way a blocking call answering with the failed envelope does.
#[tokio::test(start_paused = true)]
async fn test_failures_after_stream_opens_trip_breaker() {
    for blocking in [false, true] {
        let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(60)));
        let provider = ScriptedProvider::new(Vec::new()).with_fallback(failed_midway());
        let provider = if blocking {
            provider.blocking_only()
        } else {
            provider
        };
        let (orchestrator, provider) =
            orchestrator_with_breaker(provider, RetryPolicy::new(1, Duration::from_millis(5)), Some(breaker.clone()));

        let mut last_events = Vec::new();
        for _ in 0..5 {
            let (id, events) = run_job(&orchestrator).await;
            assert_eq!(
                orchestrator.registry().get_job(&id).unwrap().state,
                JobState::Error
            );
            last_events = events;
        }

        assert_eq!(provider.attempts(), 3, "blocking: {}", blocking);
        assert_eq!(breaker.state(), CircuitState::Open, "blocking: {}", blocking);
        assert_eq!(
            last_events.last(),
            Some(&ProgressEvent::failure(PROVIDER_UNAVAILABLE_MESSAGE, None))
        );
    }
}

/// A stream that completes resets the failure run.
#[tokio::test(start_paused = true)]
async fn test_completed_stream_resets_failure_count() {
    let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(60)));
    let (orchestrator, provider) = orchestrator_with_breaker(
        ScriptedProvider::new(vec![
            failed_midway(),
            failed_midway(),
            ScriptedCall::text_response(&["fine"]),
            failed_midway(),
            failed_midway(),
        ]),
        RetryPolicy::disabled(),
        Some(breaker.clone()),
    );

    for _ in 0..2 {
        run_job(&orchestrator).await;
    }
    assert_eq!(breaker.consecutive_failures(), 2);
    let (id, _) = run_job(&orchestrator).await;
    assert_eq!(
        orchestrator.registry().get_job(&id).unwrap().state,
        JobState::Completed
    );
    assert_eq!(breaker.consecutive_failures(), 0);

    for _ in 0..2 {
        run_job(&orchestrator).await;
    }
    assert_eq!(breaker.state(), CircuitState::Closed);
    assert_eq!(provider.attempts(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_counts_as_retry_attempt() {
    let breaker = Arc::new(CircuitBreaker::new(1, Duration::from_secs(60)));
    let caller = ResilientCaller::new(RetryPolicy::new(3, Duration::from_secs(1)), Some(breaker.clone()));
    let calls = AtomicU32::new(0);

    let started = tokio::time::Instant::now();
    let result: Result<(), ApiError> = caller
        .call(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Timeout("slow".to_string()).into()) }
        })
        .await;

    // First attempt reaches the provider and opens the breaker; the other two are
    // rejected without contacting it.
    assert!(matches!(result, Err(ApiError::CircuitOpen { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_retry_delays_double_each_attempt() {
    let caller = ResilientCaller::new(RetryPolicy::new(4, Duration::from_millis(500)), None);
    let started = tokio::time::Instant::now();
    let stamps = parking_lot::Mutex::new(Vec::new());

    let result: Result<(), ApiError> = caller
        .call(|_| {
            stamps.lock().push(started.elapsed());
            async { Err(ProviderError::Connection("reset".to_string()).into()) }
        })
        .await;

    assert!(result.is_err());
    assert_eq!(
        *stamps.lock(),
        vec![
            Duration::ZERO,
            Duration::from_millis(500),
            Duration::from_millis(1500),
            Duration::from_millis(3500),
        ]
    );
}

#[tokio::test]
async fn test_non_transient_error_is_not_retried() {
    let caller = ResilientCaller::new(RetryPolicy::new(3, Duration::from_millis(1)), None);
    let calls = AtomicU32::new(0);
    let result: Result<(), ApiError> = caller
        .call(|_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ProviderError::Status {
                    status: 400,
                    message: "bad request".to_string(),
                }
                .into())
            }
        })
        .await;

    assert!(matches!(result, Err(ApiError::Provider(ProviderError::Status { status: 400, .. }))));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
