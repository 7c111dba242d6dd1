//! Composable resilience primitives for fault-tolerant call sites.
//!
//! This crate wraps a user-supplied operation with failure-mitigation
//! policies:
//! - **Retry**: bounded attempts with pluggable backoff, selective error
//!   matching, and observer callbacks
//! - **Circuit breaker**: failure-threshold state machine with time-based
//!   recovery, shared across call sites by name through a registry
//! - **Fallback**: substitute results (zero value, stored value, computed
//!   value, or a raised error) when the primary operation fails or is
//!   short-circuited
//! - **Composition**: a [`Circuit`] that threads retry, breaker, and
//!   fallback around a single call site
//!
//! The bulkhead and timeout modules round out the set as independent
//! collaborators.
//!
//! The core is synchronous and thread-based: retry backoff blocks the
//! calling thread, and breaker state is process-local.
//!
//! # Examples
//!
//! ## Retry with exponential backoff
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rampart::RetryPolicy;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_attempts(5)
//!     .exponential_backoff(Duration::from_millis(100), 2.0, Duration::from_secs(30))
//!     .build()?;
//!
//! let value = policy.run(|| Ok::<_, std::io::Error>(42))?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## Circuit breaker shared through a registry
//!
//! ```rust
//! use std::time::Duration;
//!
//! use rampart::{CircuitBreaker, CircuitBreakerRegistry};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = CircuitBreakerRegistry::new();
//! let breaker = registry.create(
//!     CircuitBreaker::builder()
//!         .name("payments")
//!         .failure_threshold(3)
//!         .open_duration(Duration::from_secs(30))
//!         .build()?,
//! )?;
//!
//! assert!(breaker.admit());
//! breaker.report_success();
//! # Ok(())
//! # }
//! ```
//!
//! ## Composing a protected call
//!
//! ```rust
//! use rampart::{Circuit, FallbackPolicy};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let result: Result<i32, _> = Circuit::new("inventory")
//!     .with_fallback_policy(FallbackPolicy::value(7))
//!     .run(|| Err(std::io::Error::other("downstream unavailable")));
//!
//! assert_eq!(result?, 7);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod backoff;
pub mod breaker;
pub mod bulkhead;
pub mod circuit;
pub mod error;
pub mod fallback;
pub mod registry;
pub mod retry;
pub mod timeout;

// Re-export commonly used types for convenience
// ------------------------------
pub use backoff::BackoffStrategy;
pub use breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitState, Clock,
    MockClock, SystemClock,
};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadConfigBuilder, BulkheadError, BulkheadMetrics};
pub use circuit::Circuit;
pub use error::{
    BoxedError, ConfigError, ConfigResult, FallbackError, RampartError, RampartResult,
};
pub use fallback::{FallbackKind, FallbackOutcome, FallbackPolicy};
pub use registry::CircuitBreakerRegistry;
pub use retry::{Classify, RetryPolicy, RetryPolicyBuilder};
pub use timeout::{run_with_policy, run_with_timeout, TimeoutError, TimeoutPolicy};
