//! Integration tests for the circuit composition.
//!
//! Exercises the breaker state machine, registry sharing, and fallback
//! interaction end to end. Each test builds its own registry so breaker
//! names can be reused without cross-test interference.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rampart::{
    Circuit, CircuitBreaker, CircuitBreakerRegistry, CircuitState, FallbackPolicy, RampartError,
    RampartResult,
};

/// Custom error type for testing.
#[derive(Debug, Clone)]
struct TestError {
    message: String,
}

impl TestError {
    fn new(message: &str) -> Self {
        Self { message: message.to_string() }
    }
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TestError {}

fn register_breaker(
    registry: &CircuitBreakerRegistry,
    name: &str,
    threshold: u32,
    open_duration: Duration,
) -> Arc<CircuitBreaker> {
    registry
        .create(
            CircuitBreaker::builder()
                .name(name)
                .failure_threshold(threshold)
                .open_duration(open_duration)
                .build()
                .expect("breaker config should be valid"),
        )
        .expect("breaker registration should succeed")
}

/// Happy path with no retry and no fallback.
///
/// # Test Steps
/// 1. Register breaker "svc" with threshold 3 and a 1 s open duration
/// 2. Run an operation returning 42 through the composition
/// 3. Verify the result and that the breaker is closed with zero failures
#[test]
fn test_happy_path_no_retry_no_fallback() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "svc", 3, Duration::from_secs(1));
    let circuit: Circuit<TestError> = Circuit::with_breaker_in(&registry, breaker);

    let result = circuit.run(|| Ok(42));

    assert_eq!(result.expect("call should succeed"), 42);
    assert_eq!(circuit.breaker().state(), CircuitState::Closed);
    assert_eq!(circuit.breaker().failure_count(), 0);
}

/// Reaching the failure threshold opens the circuit.
///
/// # Test Steps
/// 1. Register breaker "svc" with threshold 3 and a 10 s open duration
/// 2. Run three operations that raise, each absorbed by the composition
/// 3. Verify the breaker is open with a failure count of 3
/// 4. Verify a fourth call with no fallback raises the open-circuit error
#[test]
fn test_threshold_opens_circuit() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "svc", 3, Duration::from_secs(10));
    let circuit: Circuit<TestError> = Circuit::with_breaker_in(&registry, breaker);

    for _ in 0..3 {
        let result: RampartResult<i32, TestError> =
            circuit.run(|| Err(TestError::new("x")));
        assert_eq!(result.expect("handled failure resolves to the zero value"), 0);
    }

    assert_eq!(circuit.breaker().state(), CircuitState::Open);
    assert_eq!(circuit.breaker().failure_count(), 3);

    let invoked = AtomicU32::new(0);
    let result = circuit.run(|| {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    });

    assert_eq!(invoked.load(Ordering::SeqCst), 0, "denied call must not invoke the operation");
    match result {
        Err(RampartError::OpenCircuit { name }) => assert_eq!(name, "svc"),
        other => panic!("Expected OpenCircuit, got {other:?}"),
    }
}

/// The circuit recovers through half-open after the open duration elapses.
///
/// # Test Steps
/// 1. Register breaker "svc" with threshold 2 and a 100 ms open duration
/// 2. Open the circuit with two failing calls
/// 3. Sleep 150 ms, then run an operation returning 99
/// 4. Verify the result and that the breaker closed with zero failures
#[test]
fn test_half_open_recovery() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "svc", 2, Duration::from_millis(100));
    let circuit: Circuit<TestError> = Circuit::with_breaker_in(&registry, breaker);

    for _ in 0..2 {
        let _ = circuit.run(|| Err::<i32, _>(TestError::new("down")));
    }
    assert_eq!(circuit.breaker().state(), CircuitState::Open);

    thread::sleep(Duration::from_millis(150));

    let result = circuit.run(|| Ok(99));

    assert_eq!(result.expect("probe call should succeed"), 99);
    assert_eq!(circuit.breaker().state(), CircuitState::Closed);
    assert_eq!(circuit.breaker().failure_count(), 0);
}

/// A failing probe call re-opens the half-open circuit.
///
/// # Test Steps
/// 1. Register breaker "svc" with threshold 2 and a 100 ms open duration
/// 2. Open the circuit with two failing calls and sleep past the duration
/// 3. Run another failing call
/// 4. Verify the breaker is open again with a refreshed failure instant
#[test]
fn test_half_open_reopens_on_failure() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "svc", 2, Duration::from_millis(100));
    let circuit: Circuit<TestError> = Circuit::with_breaker_in(&registry, breaker);

    for _ in 0..2 {
        let _ = circuit.run(|| Err::<i32, _>(TestError::new("down")));
    }
    thread::sleep(Duration::from_millis(150));

    let _ = circuit.run(|| Err::<i32, _>(TestError::new("still down")));

    assert_eq!(circuit.breaker().state(), CircuitState::Open);
    // The failure instant was refreshed, so admission is denied again.
    assert!(!circuit.breaker().admit());
}

/// A fallback value answers for an open circuit without invoking the
/// operation.
///
/// # Test Steps
/// 1. Register breaker "p" with threshold 2 and a 10 s open duration
/// 2. Open the circuit with two failing calls
/// 3. Run a call with fallback value 999
/// 4. Verify the result is 999 and the operation never ran
#[test]
fn test_fallback_value_on_open_circuit() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "p", 2, Duration::from_secs(10));
    let circuit: Circuit<TestError> = Circuit::with_breaker_in(&registry, breaker)
        .with_fallback_policy(FallbackPolicy::value(999));

    for _ in 0..2 {
        let _ = circuit.run(|| Err::<i32, _>(TestError::new("down")));
    }
    assert_eq!(circuit.breaker().state(), CircuitState::Open);

    let invoked = AtomicU32::new(0);
    let result = circuit.run(|| {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok(1)
    });

    assert_eq!(result.expect("fallback should answer"), 999);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);
}

/// Disjoint call sites sharing a breaker name contribute to one failure
/// budget.
///
/// # Test Steps
/// 1. Build two compositions resolving the name "orders" in one registry
/// 2. Fail once through each composition against a threshold of 2
/// 3. Verify both observe the open state
#[test]
fn test_call_sites_share_breaker_by_name() {
    let registry = CircuitBreakerRegistry::new();
    register_breaker(&registry, "orders", 2, Duration::from_secs(10));

    let site_a: Circuit<TestError> = Circuit::in_registry(&registry, "orders");
    let site_b: Circuit<TestError> = Circuit::in_registry(&registry, "orders");

    let _ = site_a.run(|| Err::<i32, _>(TestError::new("a")));
    assert_eq!(site_b.breaker().failure_count(), 1);

    let _ = site_b.run(|| Err::<i32, _>(TestError::new("b")));

    assert_eq!(site_a.breaker().state(), CircuitState::Open);
    assert_eq!(site_b.breaker().state(), CircuitState::Open);
    assert!(Arc::ptr_eq(site_a.breaker(), site_b.breaker()));
}

/// An empty handled set lets every failure pass through; the breaker never
/// advances.
#[test]
fn test_empty_handled_set_passes_everything_through() {
    let registry = CircuitBreakerRegistry::new();
    let breaker = register_breaker(&registry, "untouched", 1, Duration::from_secs(10));
    let circuit: Circuit<TestError> =
        Circuit::with_breaker_in(&registry, breaker).handle_if(|_| false);

    for _ in 0..5 {
        let result = circuit.run(|| Err::<i32, _>(TestError::new("boom")));
        match result {
            Err(RampartError::OperationFailed { source }) => {
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("Expected OperationFailed, got {other:?}"),
        }
    }

    assert_eq!(circuit.breaker().state(), CircuitState::Closed);
    assert_eq!(circuit.breaker().failure_count(), 0);
}

/// A computed fallback answers with a fresh value for a handled failure.
#[test]
fn test_callable_fallback_on_failure() {
    let registry = CircuitBreakerRegistry::new();
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = Arc::clone(&counter);

    let circuit: Circuit<TestError> = Circuit::in_registry(&registry, "computed")
        .with_fallback_policy(FallbackPolicy::callable(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            -1
        }));

    let result = circuit.run(|| Err::<i32, _>(TestError::new("down")));

    assert_eq!(result.expect("computed fallback should answer"), -1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

/// A raising fallback converts handled failures into the distinguished
/// fallback error.
#[test]
fn test_raising_fallback_on_failure() {
    let registry = CircuitBreakerRegistry::new();
    let circuit: Circuit<TestError> = Circuit::in_registry(&registry, "raising")
        .with_fallback_policy(FallbackPolicy::raising());

    let result = circuit.run(|| Err::<i32, _>(TestError::new("down")));

    assert!(matches!(result, Err(RampartError::FallbackRaised)));
    assert_eq!(circuit.breaker().failure_count(), 1, "the failure is still reported");
}
