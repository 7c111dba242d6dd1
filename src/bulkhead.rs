//! Bulkhead pattern for limiting concurrent operations.
//!
//! The bulkhead caps how many operations may run at once. Calls beyond the
//! cap are rejected immediately rather than queued, which keeps a slow
//! dependency from absorbing every worker thread in the process.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Configuration for bulkhead behavior.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Maximum number of concurrent operations allowed.
    pub max_concurrent: usize,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent: 10 }
    }
}

impl BulkheadConfig {
    pub fn builder() -> BulkheadConfigBuilder {
        BulkheadConfigBuilder::new()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`BulkheadConfig`].
#[derive(Debug, Default)]
pub struct BulkheadConfigBuilder {
    config: BulkheadConfig,
}

impl BulkheadConfigBuilder {
    pub fn new() -> Self {
        Self { config: BulkheadConfig::default() }
    }

    pub fn max_concurrent(mut self, max: usize) -> Self {
        self.config.max_concurrent = max;
        self
    }

    pub fn build(self) -> ConfigResult<BulkheadConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Errors from a bulkhead-guarded execution.
#[derive(Debug, Error)]
pub enum BulkheadError<E> {
    /// The bulkhead is at capacity.
    #[error("Bulkhead capacity exceeded: {capacity} concurrent operations")]
    Full { capacity: usize },

    /// The operation ran and failed.
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

/// Snapshot of bulkhead counters for monitoring.
#[derive(Debug, Clone)]
pub struct BulkheadMetrics {
    pub total_operations: u64,
    pub rejected_operations: u64,
    pub in_flight: usize,
    pub max_concurrent: usize,
}

impl BulkheadMetrics {
    /// Current utilization in `[0.0, 1.0]`.
    pub fn utilization(&self) -> f64 {
        self.in_flight as f64 / self.max_concurrent as f64
    }

    pub fn is_at_capacity(&self) -> bool {
        self.in_flight >= self.max_concurrent
    }
}

/// Concurrent-call limiter.
pub struct Bulkhead {
    config: BulkheadConfig,
    in_flight: AtomicUsize,
    total_operations: AtomicU64,
    rejected_operations: AtomicU64,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            in_flight: AtomicUsize::new(0),
            total_operations: AtomicU64::new(0),
            rejected_operations: AtomicU64::new(0),
        })
    }

    /// Create a bulkhead with the default configuration.
    pub fn with_defaults() -> Self {
        Self::new(BulkheadConfig::default()).expect("Default config should be valid")
    }

    /// Execute an operation if a slot is free, rejecting immediately
    /// otherwise. The slot is released when the operation returns, on
    /// success and on failure alike.
    pub fn execute<T, E, F>(&self, operation: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if !self.try_acquire() {
            self.rejected_operations.fetch_add(1, Ordering::Relaxed);
            warn!(capacity = self.config.max_concurrent, "Bulkhead rejecting call at capacity");
            return Err(BulkheadError::Full { capacity: self.config.max_concurrent });
        }

        let _slot = SlotGuard { in_flight: &self.in_flight };
        self.total_operations.fetch_add(1, Ordering::Relaxed);

        operation().map_err(|source| BulkheadError::OperationFailed { source })
    }

    /// Number of operations currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Maximum number of concurrent operations allowed.
    pub fn max_concurrent(&self) -> usize {
        self.config.max_concurrent
    }

    /// Snapshot the counters.
    pub fn metrics(&self) -> BulkheadMetrics {
        BulkheadMetrics {
            total_operations: self.total_operations.load(Ordering::Acquire),
            rejected_operations: self.rejected_operations.load(Ordering::Acquire),
            in_flight: self.in_flight(),
            max_concurrent: self.config.max_concurrent,
        }
    }

    fn try_acquire(&self) -> bool {
        let mut current = self.in_flight.load(Ordering::Acquire);
        loop {
            if current >= self.config.max_concurrent {
                return false;
            }
            match self.in_flight.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("max_concurrent", &self.config.max_concurrent)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Default for Bulkhead {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Releases a bulkhead slot on drop, so panicking operations cannot leak
/// capacity.
struct SlotGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::*;

    /// Validates configuration validation rejects a zero capacity.
    #[test]
    fn test_config_validation() {
        assert!(BulkheadConfig::builder().max_concurrent(0).build().is_err());

        let config = BulkheadConfig::builder().max_concurrent(3).build().expect("valid config");
        assert_eq!(config.max_concurrent, 3);
    }

    /// An idle bulkhead admits and releases its slot afterwards.
    #[test]
    fn test_execute_releases_slot() {
        let bulkhead = Bulkhead::with_defaults();

        let result: Result<i32, BulkheadError<io::Error>> = bulkhead.execute(|| Ok(42));

        assert_eq!(result.expect("should run"), 42);
        assert_eq!(bulkhead.in_flight(), 0);
        assert_eq!(bulkhead.metrics().total_operations, 1);
    }

    /// The slot is released when the operation fails.
    #[test]
    fn test_slot_released_on_failure() {
        let bulkhead = Bulkhead::with_defaults();

        let result: Result<i32, BulkheadError<io::Error>> =
            bulkhead.execute(|| Err(io::Error::other("boom")));

        assert!(matches!(result, Err(BulkheadError::OperationFailed { .. })));
        assert_eq!(bulkhead.in_flight(), 0);
    }

    /// Tests calls beyond the capacity are rejected while a slot is held.
    ///
    /// A worker thread occupies the single slot until the main thread has
    /// observed the rejection.
    #[test]
    fn test_rejects_at_capacity() {
        let bulkhead = Arc::new(
            Bulkhead::new(BulkheadConfig::builder().max_concurrent(1).build().expect("valid"))
                .expect("valid config"),
        );

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let worker = {
            let bulkhead = Arc::clone(&bulkhead);
            thread::spawn(move || {
                let result: Result<(), BulkheadError<io::Error>> = bulkhead.execute(|| {
                    entered_tx.send(()).expect("main thread should be listening");
                    release_rx.recv().expect("main thread should release the slot");
                    Ok(())
                });
                result.expect("worker execution should succeed");
            })
        };

        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should acquire the slot");
        assert_eq!(bulkhead.in_flight(), 1);

        let rejected: Result<(), BulkheadError<io::Error>> = bulkhead.execute(|| Ok(()));
        match rejected {
            Err(BulkheadError::Full { capacity }) => assert_eq!(capacity, 1),
            other => panic!("Expected Full, got {other:?}"),
        }
        assert_eq!(bulkhead.metrics().rejected_operations, 1);

        release_tx.send(()).expect("worker should be waiting");
        worker.join().expect("worker should not panic");
        assert_eq!(bulkhead.in_flight(), 0);
    }

    /// Utilization reflects the in-flight count.
    #[test]
    fn test_metrics_utilization() {
        let bulkhead = Bulkhead::with_defaults();
        let metrics = bulkhead.metrics();

        assert_eq!(metrics.utilization(), 0.0);
        assert!(!metrics.is_at_capacity());
        assert_eq!(metrics.max_concurrent, 10);
    }
}
