//! Timeout execution for slow operations.
//!
//! [`run_with_timeout`] runs the operation on a worker thread and races it
//! against a timer. An operation that outlives its deadline is abandoned,
//! not cancelled: the worker keeps running to completion and its result is
//! discarded.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Timeout policy value carried by a composition.
///
/// The composition stores this without interpreting it; the actual timing
/// happens in [`run_with_timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub timeout: Duration,
}

impl TimeoutPolicy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(1) }
    }
}

/// Errors from a timed execution.
#[derive(Debug, Error)]
pub enum TimeoutError<E> {
    /// The deadline elapsed before the operation produced a result.
    #[error("Operation timed out after {timeout:?}")]
    Elapsed { timeout: Duration },

    /// The operation completed in time but failed.
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },

    /// The worker could not be started or died before reporting a result.
    #[error("Worker thread terminated before producing a result")]
    WorkerLost,
}

/// Run an operation with a deadline.
///
/// Returns the operation's result when it finishes within `timeout`, and
/// [`TimeoutError::Elapsed`] otherwise. The abandoned operation is not
/// cancelled.
pub fn run_with_timeout<T, E, F>(operation: F, timeout: Duration) -> Result<T, TimeoutError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let (sender, receiver) = mpsc::channel();

    let spawned = thread::Builder::new().name("rampart-timeout".to_string()).spawn(move || {
        // The receiver may be gone when the deadline has already elapsed.
        let _ = sender.send(operation());
    });
    if spawned.is_err() {
        warn!("Failed to spawn timeout worker thread");
        return Err(TimeoutError::WorkerLost);
    }

    match receiver.recv_timeout(timeout) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(source)) => Err(TimeoutError::OperationFailed { source }),
        Err(RecvTimeoutError::Timeout) => {
            warn!(timeout = ?timeout, "Operation timed out");
            Err(TimeoutError::Elapsed { timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(TimeoutError::WorkerLost),
    }
}

/// Run an operation with the deadline carried by a [`TimeoutPolicy`].
pub fn run_with_policy<T, E, F>(operation: F, policy: TimeoutPolicy) -> Result<T, TimeoutError<E>>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    run_with_timeout(operation, policy.timeout)
}
