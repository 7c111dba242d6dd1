//! Circuit composition: threads retry, breaker, and fallback policies
//! around a single call site.
//!
//! A [`Circuit`] is ephemeral: construct it at the call site, configure it
//! with builder methods, and consume it with [`Circuit::run`]. The breaker
//! behind it is durable and shared: compositions built with the same name
//! resolve to the same registered instance, so disjoint call sites
//! contribute to one failure budget.
//!
//! Per attempt, the composition asks the breaker for admission, invokes the
//! operation, and reports the outcome. Errors inside the handled set count
//! toward the breaker and are eligible for fallback substitution; errors
//! outside it pass through untouched. When a retry policy is attached the
//! whole sequence becomes the retry body, so the breaker sees every attempt;
//! the fallback resolves the final outcome once the attempts settle.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::breaker::CircuitBreaker;
use crate::error::{RampartError, RampartResult};
use crate::fallback::{FallbackOutcome, FallbackPolicy};
use crate::registry::CircuitBreakerRegistry;
use crate::retry::{Classify, RetryPolicy};
use crate::timeout::TimeoutPolicy;

type HandledMatcher<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Outcome of a single protected attempt.
#[derive(Debug)]
enum AttemptError<E> {
    /// Admission was denied; the operation was not invoked.
    Denied,
    /// The operation failed inside the handled set and was reported.
    Handled(E),
    /// The operation failed outside the handled set; nothing was reported.
    Unhandled(E),
}

/// Composition of a circuit breaker with optional retry, timeout, and
/// fallback policies around one operation.
pub struct Circuit<E> {
    breaker: Arc<CircuitBreaker>,
    retry: Option<RetryPolicy<E>>,
    timeout: Option<TimeoutPolicy>,
    fallback: Option<FallbackPolicy>,
    handled: Option<HandledMatcher<E>>,
}

impl<E> fmt::Debug for Circuit<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Circuit")
            .field("breaker", &self.breaker.name())
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .field("fallback", &self.fallback)
            .field("handled", &self.handled.as_ref().map(|_| "<matcher>"))
            .finish()
    }
}

impl<E> Circuit<E> {
    /// Compose around the named breaker in the global registry, creating it
    /// with the default thresholds when absent.
    pub fn new(name: &str) -> Self {
        Self::in_registry(CircuitBreakerRegistry::global(), name)
    }

    /// Compose around the named breaker in an explicit registry.
    pub fn in_registry(registry: &CircuitBreakerRegistry, name: &str) -> Self {
        Self::from_breaker(registry.get_or_create(name))
    }

    /// Compose around an externally constructed breaker, registering it in
    /// the global registry on first use so name-based call sites share it.
    pub fn with_breaker(breaker: Arc<CircuitBreaker>) -> Self {
        Self::from_breaker(CircuitBreakerRegistry::global().register(breaker))
    }

    /// Compose around an externally constructed breaker, registering it in
    /// the given registry.
    pub fn with_breaker_in(
        registry: &CircuitBreakerRegistry,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self::from_breaker(registry.register(breaker))
    }

    fn from_breaker(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker, retry: None, timeout: None, fallback: None, handled: None }
    }

    /// Attach a retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy<E>) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Attach a timeout policy. Stored for the timeout executor; the
    /// composition itself does not interpret it.
    pub fn with_timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.timeout = Some(policy);
        self
    }

    /// Attach a fallback policy.
    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback = Some(policy);
        self
    }

    /// Treat every operation error as a handled failure (the default).
    pub fn handle_all(mut self) -> Self {
        self.handled = None;
        self
    }

    /// Handle only errors whose [`Classify::classify`] kind is in the given
    /// set. With an empty set every failure passes through and the breaker
    /// never advances.
    pub fn handle_kinds<I>(mut self, kinds: I) -> Self
    where
        E: Classify,
        I: IntoIterator<Item = E::Kind>,
    {
        let set: HashSet<E::Kind> = kinds.into_iter().collect();
        self.handled = Some(Arc::new(move |error: &E| set.contains(&error.classify())));
        self
    }

    /// Handle only errors accepted by the predicate.
    pub fn handle_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.handled = Some(Arc::new(predicate));
        self
    }

    /// The breaker this composition reports to.
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// The attached retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy<E>> {
        self.retry.as_ref()
    }

    /// The attached timeout policy, if any.
    pub fn timeout_policy(&self) -> Option<&TimeoutPolicy> {
        self.timeout.as_ref()
    }

    /// The attached fallback policy, if any.
    pub fn fallback_policy(&self) -> Option<&FallbackPolicy> {
        self.fallback.as_ref()
    }

    fn handles(&self, error: &E) -> bool {
        match &self.handled {
            Some(matcher) => matcher(error),
            None => true,
        }
    }
}

impl<E> Circuit<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Run an operation under this composition.
    ///
    /// The breaker's admission and reporting happen on every attempt. A
    /// denied admission resolves through the fallback or raises
    /// [`RampartError::OpenCircuit`]; a handled failure resolves through the
    /// fallback, falling back to the zero value of `T` as a last resort; an
    /// unhandled failure propagates unchanged.
    pub fn run<T, F>(&self, mut operation: F) -> RampartResult<T, E>
    where
        T: Any + Clone + Default,
        F: FnMut() -> Result<T, E>,
    {
        let attempt_body = || -> Result<T, AttemptError<E>> {
            if !self.breaker.admit() {
                debug!(name = self.breaker.name(), "Admission denied by circuit breaker");
                return Err(AttemptError::Denied);
            }

            match operation() {
                Ok(value) => {
                    self.breaker.report_success();
                    Ok(value)
                }
                Err(error) if self.handles(&error) => {
                    self.breaker.report_failure();
                    Err(AttemptError::Handled(error))
                }
                Err(error) => Err(AttemptError::Unhandled(error)),
            }
        };

        let outcome = match &self.retry {
            Some(policy) => lift_policy(policy).run(attempt_body),
            None => {
                let mut attempt_body = attempt_body;
                attempt_body()
            }
        };

        match outcome {
            Ok(value) => Ok(value),
            Err(AttemptError::Denied) => self.resolve_denied(),
            Err(AttemptError::Handled(error)) => self.resolve_handled(error),
            Err(AttemptError::Unhandled(error)) => {
                Err(RampartError::OperationFailed { source: error })
            }
        }
    }

    /// Construct a composition and run an operation through it in one call.
    pub fn run_with<T, F>(
        operation: F,
        name: &str,
        retry: Option<RetryPolicy<E>>,
        timeout: Option<TimeoutPolicy>,
        fallback: Option<FallbackPolicy>,
    ) -> RampartResult<T, E>
    where
        T: Any + Clone + Default,
        F: FnMut() -> Result<T, E>,
    {
        let mut circuit = Circuit::new(name);
        circuit.retry = retry;
        circuit.timeout = timeout;
        circuit.fallback = fallback;
        circuit.run(operation)
    }

    /// Resolve a denied admission: fallback value, else an open-circuit
    /// error. The operation was never invoked and nothing was reported.
    fn resolve_denied<T>(&self) -> RampartResult<T, E>
    where
        T: Any + Clone + Default,
    {
        match self.fallback.as_ref().map(FallbackPolicy::produce::<T>) {
            Some(FallbackOutcome::Value(value)) => Ok(value),
            Some(FallbackOutcome::Raised) => Err(RampartError::FallbackRaised),
            Some(FallbackOutcome::Unavailable) | None => {
                Err(RampartError::OpenCircuit { name: self.breaker.name().to_string() })
            }
        }
    }

    /// Resolve a handled failure: fallback value first, then the zero value
    /// of `T` as a last resort.
    fn resolve_handled<T>(&self, error: E) -> RampartResult<T, E>
    where
        T: Any + Clone + Default,
    {
        match self.fallback.as_ref().map(FallbackPolicy::produce::<T>) {
            Some(FallbackOutcome::Value(value)) => Ok(value),
            Some(FallbackOutcome::Raised) => Err(RampartError::FallbackRaised),
            Some(FallbackOutcome::Unavailable) | None => {
                debug!(
                    name = self.breaker.name(),
                    error = %error,
                    "Substituting the zero value for a handled failure"
                );
                Ok(T::default())
            }
        }
    }
}

/// Rebase a retry policy onto per-attempt outcomes. Handled failures follow
/// the policy's own selection; denied admissions are retried, since the
/// breaker readmits on its own once the open duration elapses; unhandled
/// errors stop the loop.
fn lift_policy<E>(policy: &RetryPolicy<E>) -> RetryPolicy<AttemptError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let selection = policy.clone();
    let observation = policy.clone();

    RetryPolicy::from_parts(
        policy.max_attempts(),
        policy.backoff().clone(),
        move |error: &AttemptError<E>, attempt| match error {
            AttemptError::Denied => true,
            AttemptError::Handled(inner) => selection.should_retry(inner, attempt),
            AttemptError::Unhandled(_) => false,
        },
        move |error: &AttemptError<E>, attempt, delay| {
            if let AttemptError::Handled(inner) = error {
                observation.notify(inner, attempt, delay);
            }
        },
    )
}
