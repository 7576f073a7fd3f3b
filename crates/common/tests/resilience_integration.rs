//! Integration tests for the resilience module
//!
//! Exercises retry, backoff and circuit breaking together the way the
//! storage layer composes them.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use streamwarden_common::error::{CommonError, FailureKind};
use streamwarden_common::resilience::{
    compute_delay, with_retry, CircuitBreaker, CircuitBreakerConfig, CircuitState, JitterSource,
    MockClock, ResilienceError, Retry, RetryConfig, RetryError,
};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .no_jitter()
        .build()
        .expect("valid retry config")
}

fn network_down() -> CommonError {
    CommonError::backend("storage", "connection reset by peer", true)
}

/// Validates recovery from transient failures.
///
/// Assertions:
/// - The operation succeeds on the 4th invocation.
/// - Exactly 4 invocations happen.
#[tokio::test]
async fn test_retry_recovers_from_transient_failures() {
    let calls = Arc::new(AtomicU32::new(0));

    let result = with_retry(&fast_retry(5), || {
        let calls = Arc::clone(&calls);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 4 {
                Err(network_down())
            } else {
                Ok(n)
            }
        }
    })
    .await;

    assert_eq!(result.expect("recovered"), 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Validates the retry budget.
///
/// Assertions:
/// - A persistently transient operation is invoked `max_retries + 1` times.
/// - The error reports exhaustion with a transient classification.
#[tokio::test]
async fn test_retry_budget_is_max_retries_plus_one() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), _> = with_retry(&fast_retry(3), || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(network_down())
        }
    })
    .await;

    let err = result.expect_err("budget spent");
    assert!(matches!(err, RetryError::Exhausted { .. }));
    assert_eq!(err.attempts(), 4);
    assert_eq!(err.classification().kind, FailureKind::Transient);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_fatal_failure_is_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));

    let result: Result<(), _> = with_retry(&fast_retry(5), || {
        let calls = Arc::clone(&calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(CommonError::unauthorized("watch messages"))
        }
    })
    .await;

    let err = result.expect_err("fatal");
    assert!(err.classification().is_fatal());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_custom_predicate_overrides_classification() {
    let calls = Arc::new(AtomicU32::new(0));
    let retry =
        Retry::new(fast_retry(5)).should_retry(|_err: &CommonError, _c, attempt| attempt < 2);

    let result: Result<(), _> = retry
        .run(|| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CommonError::validation("title", "required"))
            }
        })
        .await;

    assert!(matches!(result, Err(RetryError::NonRetryable { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Validates that a breaker stops calls to a dependency after repeated
/// failures and serves the fallback instead.
///
/// Assertions:
/// - Three failures open a threshold-3 breaker.
/// - Later calls hit the fallback; the dependency call count stays at 3.
/// - After the reset timeout a successful trial closes the circuit.
#[tokio::test]
async fn test_breaker_fallback_and_recovery() -> anyhow::Result<()> {
    let clock = MockClock::new();
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(3)
        .reset_timeout(Duration::from_secs(30))
        .build()?;
    let breaker = CircuitBreaker::with_clock("read", config, clock.clone())?;
    let dependency_calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result: Result<&str, ResilienceError<CommonError>> = breaker
            .execute_or_else(
                || async {
                    dependency_calls.fetch_add(1, Ordering::SeqCst);
                    Err(network_down())
                },
                || async { Ok("fallback") },
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::OperationFailed { .. })));
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    for _ in 0..5 {
        let result: Result<&str, ResilienceError<CommonError>> = breaker
            .execute_or_else(
                || async {
                    dependency_calls.fetch_add(1, Ordering::SeqCst);
                    Ok("live")
                },
                || async { Ok("fallback") },
            )
            .await;
        assert_eq!(result.expect("fallback"), "fallback");
    }
    assert_eq!(dependency_calls.load(Ordering::SeqCst), 3);

    clock.advance(Duration::from_secs(30));
    let result: Result<&str, ResilienceError<CommonError>> =
        breaker.execute(|| async { Ok("live") }).await;
    assert_eq!(result?, "live");
    assert_eq!(breaker.state(), CircuitState::Closed);
    Ok(())
}

#[tokio::test]
async fn test_retry_around_breaker_stops_on_open_circuit_budget() {
    let breaker = CircuitBreaker::new(
        "write",
        CircuitBreakerConfig::builder()
            .failure_threshold(2)
            .reset_timeout(Duration::from_secs(60))
            .build()
            .expect("valid breaker config"),
    )
    .expect("breaker");

    let result: Result<(), _> = with_retry(&fast_retry(4), || {
        let breaker = breaker.clone();
        async move { breaker.execute(|| async { Err::<(), _>(network_down()) }).await }
    })
    .await;

    let err = result.expect_err("never succeeds");
    assert_eq!(err.attempts(), 5);
    assert!(err.source_error().is_circuit_open());
    assert_eq!(breaker.snapshot().rejected_calls, 3);
}

#[test]
fn test_backoff_sequence_is_deterministic_when_seeded() {
    let initial = Duration::from_millis(1000);
    let max = Duration::from_millis(60_000);
    let first: Vec<Duration> = {
        let jitter = JitterSource::seeded(99);
        (1..10).map(|a| compute_delay(a, initial, max, 0.2, &jitter)).collect()
    };
    let second: Vec<Duration> = {
        let jitter = JitterSource::seeded(99);
        (1..10).map(|a| compute_delay(a, initial, max, 0.2, &jitter)).collect()
    };
    assert_eq!(first, second);
    assert!(first.iter().all(|d| *d <= max));
}

#[test]
fn test_snapshot_reflects_rejections_outside_async_test() {
    let config = CircuitBreakerConfig::builder()
        .failure_threshold(1)
        .reset_timeout(Duration::from_secs(60))
        .build()
        .expect("valid breaker config");
    let breaker = CircuitBreaker::new("query", config).expect("breaker");

    tokio_test::block_on(async {
        let first: Result<(), _> = breaker.execute(|| async { Err(network_down()) }).await;
        assert!(matches!(first, Err(ResilienceError::OperationFailed { .. })));

        let second: Result<(), ResilienceError<CommonError>> =
            breaker.execute(|| async { Ok(()) }).await;
        assert!(second.expect_err("open").is_circuit_open());
    });

    let snapshot = breaker.snapshot();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.rejected_calls, 1);
}
