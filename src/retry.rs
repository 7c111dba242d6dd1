//! Retry engine with pluggable backoff and selective error matching.
//!
//! [`RetryPolicy::run`] invokes an operation up to `max_attempts` times,
//! sleeping on the calling thread between attempts. Which failures are
//! retried is decided by the policy's selection: a custom predicate takes
//! precedence over a kind set, and retrying on all errors is the default.
//! The final failure re-raises the last observed error; the engine never
//! substitutes an error of its own.

use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::backoff::BackoffStrategy;
use crate::error::{ConfigError, ConfigResult};

/// Classifies an error into a stable kind for selection decisions.
///
/// This is the crate's analogue of [`std::io::Error::kind`]: a cheap,
/// hashable tag that identifies which family a concrete error belongs to.
/// Implement it on error enums to enable kind-based retry selection and
/// handled-kind filtering on compositions.
pub trait Classify {
    /// The kind tag produced for each error value.
    type Kind: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Return the kind of this error.
    fn classify(&self) -> Self::Kind;
}

impl Classify for std::io::Error {
    type Kind = std::io::ErrorKind;

    fn classify(&self) -> Self::Kind {
        self.kind()
    }
}

type KindMatcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;
type RetryPredicate<E> = Arc<dyn Fn(&E, u32) -> bool + Send + Sync>;
type RetryObserver<E> = Arc<dyn Fn(&E, u32, Duration) + Send + Sync>;

/// Policy controlling how an operation is retried.
///
/// Cheap to clone; the selection and observer callbacks are shared.
pub struct RetryPolicy<E> {
    max_attempts: u32,
    backoff: BackoffStrategy,
    kinds: Option<KindMatcher<E>>,
    predicate: Option<RetryPredicate<E>>,
    observer: Option<RetryObserver<E>>,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        Self {
            max_attempts: self.max_attempts,
            backoff: self.backoff.clone(),
            kinds: self.kinds.clone(),
            predicate: self.predicate.clone(),
            observer: self.observer.clone(),
        }
    }
}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("kinds", &self.kinds.as_ref().map(|_| "<matcher>"))
            .field("predicate", &self.predicate.as_ref().map(|_| "<predicate>"))
            .field("observer", &self.observer.as_ref().map(|_| "<observer>"))
            .finish()
    }
}

impl<E> Default for RetryPolicy<E> {
    /// Three attempts with the default exponential backoff, retrying on all
    /// errors.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            kinds: None,
            predicate: None,
            observer: None,
        }
    }
}

impl<E> RetryPolicy<E> {
    /// Create a policy with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a policy builder.
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    /// Maximum number of operation invocations per `run`.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// The configured backoff strategy.
    pub fn backoff(&self) -> &BackoffStrategy {
        &self.backoff
    }

    /// Decide whether `error` should be retried at the given attempt.
    ///
    /// A configured predicate takes precedence over any kind set; with
    /// neither configured every error is retried.
    pub(crate) fn should_retry(&self, error: &E, attempt: u32) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(error, attempt);
        }
        if let Some(kinds) = &self.kinds {
            return kinds(error);
        }
        true
    }

    /// Invoke the observer, if one is configured.
    pub(crate) fn notify(&self, error: &E, attempt: u32, delay: Duration) {
        if let Some(observer) = &self.observer {
            observer(error, attempt, delay);
        }
    }

    /// Internal: assemble a policy from explicit parts, bypassing builder
    /// validation. Used to rebase an already validated policy onto a wrapped
    /// error type.
    pub(crate) fn from_parts<P, O>(
        max_attempts: u32,
        backoff: BackoffStrategy,
        predicate: P,
        observer: O,
    ) -> Self
    where
        P: Fn(&E, u32) -> bool + Send + Sync + 'static,
        O: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        Self {
            max_attempts,
            backoff,
            kinds: None,
            predicate: Some(Arc::new(predicate)),
            observer: Some(Arc::new(observer)),
        }
    }

    /// Execute an operation with retry logic.
    ///
    /// The operation is invoked at least once and at most
    /// [`max_attempts`](Self::max_attempts) times. The observer is called
    /// exactly once per completed retry, before the backoff sleep.
    pub fn run<T, F>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        E: fmt::Debug,
    {
        let mut attempt: u32 = 1;

        loop {
            debug!(attempt, max_attempts = self.max_attempts, "Executing operation");

            match operation() {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(&error, attempt) {
                        debug!(attempt, error = ?error, "Retry selection rejected the error");
                        return Err(error);
                    }

                    if attempt >= self.max_attempts {
                        warn!(
                            attempt,
                            error = ?error,
                            "All retry attempts exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.backoff.delay_for(attempt);
                    self.notify(&error, attempt, delay);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay = ?delay,
                        error = ?error,
                        "Attempt failed, backing off"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

/// Builder for [`RetryPolicy`] with a fluent API.
pub struct RetryPolicyBuilder<E> {
    policy: RetryPolicy<E>,
}

impl<E> Default for RetryPolicyBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> RetryPolicyBuilder<E> {
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.policy.max_attempts = attempts;
        self
    }

    /// Replace the backoff strategy wholesale.
    pub fn backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.policy.backoff = strategy;
        self
    }

    pub fn fixed_backoff(mut self, delay: Duration) -> Self {
        self.policy.backoff = BackoffStrategy::fixed(delay);
        self
    }

    pub fn linear_backoff(mut self, increment: Duration, max_delay: Duration) -> Self {
        self.policy.backoff = BackoffStrategy::linear(increment, max_delay);
        self
    }

    pub fn exponential_backoff(
        mut self,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        self.policy.backoff = BackoffStrategy::exponential(initial_delay, multiplier, max_delay);
        self
    }

    pub fn jittered_backoff(
        mut self,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        jitter_factor: f64,
    ) -> Self {
        self.policy.backoff =
            BackoffStrategy::jittered(initial_delay, multiplier, max_delay, jitter_factor);
        self
    }

    /// Retry every error. Clears any kind set or predicate.
    pub fn retry_on_all(mut self) -> Self {
        self.policy.kinds = None;
        self.policy.predicate = None;
        self
    }

    /// Retry only errors whose [`Classify::classify`] kind is in the given
    /// set. An empty set retries nothing.
    pub fn retry_on_kinds<I>(mut self, kinds: I) -> Self
    where
        E: Classify,
        I: IntoIterator<Item = E::Kind>,
    {
        let set: HashSet<E::Kind> = kinds.into_iter().collect();
        self.policy.kinds = Some(Arc::new(move |error: &E| set.contains(&error.classify())));
        self
    }

    /// Retry only errors accepted by the predicate. Takes precedence over
    /// any configured kind set.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E, u32) -> bool + Send + Sync + 'static,
    {
        self.policy.predicate = Some(Arc::new(predicate));
        self
    }

    /// Observe each completed retry with `(error, attempt, planned_delay)`.
    pub fn on_retry<F>(mut self, observer: F) -> Self
    where
        F: Fn(&E, u32, Duration) + Send + Sync + 'static,
    {
        self.policy.observer = Some(Arc::new(observer));
        self
    }

    pub fn build(self) -> ConfigResult<RetryPolicy<E>> {
        if self.policy.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be greater than 0"));
        }
        Ok(self.policy)
    }
}
