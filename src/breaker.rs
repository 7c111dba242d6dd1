//! Circuit breaker state machine with time-based recovery.
//!
//! A breaker tracks consecutive failures reported by its callers and trips
//! open once a threshold is reached. After the configured open duration has
//! elapsed on the monotonic clock, the next admission check moves the
//! breaker to half-open and lets a probe call through; a success closes the
//! circuit again, a failure re-opens it.
//!
//! All state transitions are serialized under the breaker's internal lock.
//! The observable `state` and `failure_count` are mirrored into atomics so
//! the read-only getters never contend with callers in flight.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing.
///
/// Breakers use real monotonic time in production and controlled mock time
/// in tests, so timeout-based transitions can be tested without real delays.
pub trait Clock: Send + Sync + 'static {
    /// Current instant on the monotonic clock.
    fn now(&self) -> Instant;
}

/// Real system clock for production use.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Mock clock for deterministic testing.
///
/// Time only moves when [`MockClock::advance`] is called.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration.
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut elapsed) = self.elapsed.lock() {
            *elapsed += duration;
        }
    }

    /// Current elapsed time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.elapsed.lock().map(|e| *e).unwrap_or(Duration::ZERO)
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, admitting calls.
    Closed,
    /// Circuit is open, denying calls.
    Open,
    /// Circuit is half-open, probing for recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name the breaker is registered and shared under.
    pub name: String,
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,
    /// Minimum time spent open before admission may probe again.
    pub open_duration: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            open_duration: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Create a named configuration with the default thresholds.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreakerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Circuit Breaker
//==============================================================================

struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// Named circuit breaker instance.
///
/// Shared through `Arc` by the registry; every call site holding a clone
/// observes the same state.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    state_cell: AtomicU8,
    failure_count_cell: AtomicU32,
    clock: C,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

fn encode_state(state: CircuitState) -> u8 {
    match state {
        CircuitState::Closed => STATE_CLOSED,
        CircuitState::Open => STATE_OPEN,
        CircuitState::HalfOpen => STATE_HALF_OPEN,
    }
}

fn decode_state(raw: u8) -> CircuitState {
    match raw {
        STATE_OPEN => CircuitState::Open,
        STATE_HALF_OPEN => CircuitState::HalfOpen,
        _ => CircuitState::Closed,
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker with the given configuration on the system clock.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a named breaker with the default thresholds.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::named(name)).expect("Default config should be valid")
    }

    /// Create a breaker configuration builder.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing).
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
            state_cell: AtomicU8::new(STATE_CLOSED),
            failure_count_cell: AtomicU32::new(0),
            clock,
        })
    }

    /// Name the breaker is shared under.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Current state, read lock-free.
    pub fn state(&self) -> CircuitState {
        decode_state(self.state_cell.load(Ordering::Acquire))
    }

    /// Current consecutive-failure count, read lock-free.
    pub fn failure_count(&self) -> u32 {
        self.failure_count_cell.load(Ordering::Acquire)
    }

    /// The configuration this breaker was built with.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed.
    ///
    /// Closed and half-open circuits admit. An open circuit admits once the
    /// open duration has elapsed since the last failure, transitioning to
    /// half-open as it does; the decision is level-triggered, so a denied
    /// caller can simply try again later.
    pub fn admit(&self) -> bool {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map(|at| self.clock.now().saturating_duration_since(at));
                match elapsed {
                    Some(elapsed) if elapsed > self.config.open_duration => {
                        inner.state = CircuitState::HalfOpen;
                        self.publish(&inner);
                        info!(
                            name = %self.config.name,
                            "Circuit transitioning from OPEN to HALF_OPEN"
                        );
                        true
                    }
                    _ => false,
                }
            }
        }
    }

    /// Record a successful call.
    ///
    /// Resets the failure count; a half-open circuit closes.
    pub fn report_success(&self) {
        let mut inner = self.lock_inner();

        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            info!(name = %self.config.name, "Circuit transitioning from HALF_OPEN to CLOSED");
        }
        self.publish(&inner);
    }

    /// Record a failed call.
    ///
    /// Increments the failure count and stamps the failure instant; reaching
    /// the threshold opens the circuit.
    pub fn report_failure(&self) {
        let mut inner = self.lock_inner();

        inner.failure_count += 1;
        inner.last_failure_at = Some(self.clock.now());

        if inner.failure_count >= self.config.failure_threshold
            && inner.state != CircuitState::Open
        {
            inner.state = CircuitState::Open;
            warn!(
                name = %self.config.name,
                failures = inner.failure_count,
                "Circuit opened after consecutive failures"
            );
        }
        self.publish(&inner);
    }

    /// Reset the breaker to the closed state with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.lock_inner();

        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        self.publish(&inner);
        info!(name = %self.config.name, "Circuit manually reset to CLOSED");
    }

    /// Mirror the locked state into the lock-free cells.
    fn publish(&self, inner: &BreakerInner) {
        self.state_cell.store(encode_state(inner.state), Ordering::Release);
        self.failure_count_cell.store(inner.failure_count, Ordering::Release);
    }

    fn lock_inner(&self) -> MutexGuard<'_, BreakerInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(name = %self.config.name, "Circuit breaker state lock poisoned");
                poisoned.into_inner()
            }
        }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.config.name)
            .field("failure_threshold", &self.config.failure_threshold)
            .field("open_duration", &self.config.open_duration)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .finish()
    }
}

impl Default for CircuitBreaker<SystemClock> {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default()).expect("Default config should be valid")
    }
}
