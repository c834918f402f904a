//! Property-based tests for breaker and retry arithmetic

use genstream::resilience::{CircuitBreaker, CircuitState, RetryPolicy};
use proptest::prelude::*;
use std::time::Duration;

proptest! {
    /// Fewer than `threshold` consecutive failures keep the breaker closed; the
    /// threshold-th one opens it.
    #[test]
    fn test_breaker_opens_exactly_at_threshold(threshold in 1u32..20, extra_successes in 0usize..5) {
        let breaker = CircuitBreaker::new(threshold, Duration::from_secs(60));

        for _ in 0..extra_successes {
            breaker.record_success();
        }
        for failures in 1..threshold {
            breaker.record_failure();
            prop_assert_eq!(breaker.state(), CircuitState::Closed);
            prop_assert_eq!(breaker.consecutive_failures(), failures);
        }
        breaker.record_failure();
        prop_assert_eq!(breaker.state(), CircuitState::Open);
        prop_assert!(breaker.try_acquire().is_err());
    }

    /// A success anywhere in a failure run resets the count.
    #[test]
    fn test_success_resets_failure_run(threshold in 2u32..20, before in 1u32..20) {
        let before = before.min(threshold - 1);
        let breaker = CircuitBreaker::new(threshold, Duration::from_secs(60));
        for _ in 0..before {
            breaker.record_failure();
        }
        breaker.record_success();
        prop_assert_eq!(breaker.consecutive_failures(), 0);
        for _ in 1..threshold {
            breaker.record_failure();
        }
        prop_assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Delay before attempt k+1 is base * 2^(k-1).
    #[test]
    fn test_retry_delays_are_exponential(base_ms in 1u64..5_000, attempts in 1u32..10) {
        let policy = RetryPolicy::new(attempts, Duration::from_millis(base_ms));
        for attempt in 1..=attempts {
            let expected = Duration::from_millis(base_ms * (1u64 << (attempt - 1)));
            prop_assert_eq!(policy.delay_for(attempt), expected);
        }
    }
}

/// Cooldown, then two successes, walks open -> half-open -> closed.
#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_cooldown() {
    for (threshold, cooldown_secs) in [(1u32, 1u64), (3, 30), (5, 60), (9, 599)] {
        let cooldown = Duration::from_secs(cooldown_secs);
        let breaker = CircuitBreaker::new(threshold, cooldown);
        for _ in 0..threshold {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(cooldown - Duration::from_millis(1)).await;
        assert!(breaker.try_acquire().is_err());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
