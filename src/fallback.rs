//! Fallback policies for substituting a result when an operation fails or
//! is short-circuited.
//!
//! A policy is a value-producing tagged union. The stored payload is
//! type-erased and tagged with its runtime type; retrieval at a concrete
//! result type checks compatibility and reports a mismatch as an inability
//! to produce a value rather than an error.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{BoxedError, FallbackError};

/// Which behavior a [`FallbackPolicy`] was constructed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Yield the zero value of the caller's result type.
    Default,
    /// Yield a stored value.
    Value,
    /// Invoke a callable and yield its result.
    Callable,
    /// Raise a distinguished error instead of producing a value.
    Throw,
}

impl fmt::Display for FallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackKind::Default => write!(f, "DEFAULT"),
            FallbackKind::Value => write!(f, "VALUE"),
            FallbackKind::Callable => write!(f, "CALLABLE"),
            FallbackKind::Throw => write!(f, "THROW"),
        }
    }
}

/// Outcome of asking a policy for a value of a concrete type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackOutcome<T> {
    /// A value was produced.
    Value(T),
    /// No value of the requested type could be produced.
    Unavailable,
    /// The policy is configured to raise.
    Raised,
}

type ErasedValue = Arc<dyn Any + Send + Sync>;
type ErasedCallable = Arc<dyn Fn() -> Option<Box<dyn Any + Send + Sync>> + Send + Sync>;

/// Fallback strategy invoked when a primary operation fails or is
/// short-circuited by an open breaker.
///
/// Policies are cheap to clone and safe to share between threads.
#[derive(Clone)]
pub struct FallbackPolicy {
    kind: FallbackKind,
    value: Option<ErasedValue>,
    value_type: Option<TypeId>,
    callable: Option<ErasedCallable>,
}

impl fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackPolicy")
            .field("kind", &self.kind)
            .field("has_value", &self.value.is_some())
            .field("has_callable", &self.callable.is_some())
            .finish()
    }
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self::default_value()
    }
}

impl FallbackPolicy {
    fn with_kind(kind: FallbackKind) -> Self {
        Self { kind, value: None, value_type: None, callable: None }
    }

    /// Yield the zero value of the caller's result type.
    pub fn default_value() -> Self {
        Self::with_kind(FallbackKind::Default)
    }

    /// Yield the given value whenever the requested type matches.
    pub fn value<V>(value: V) -> Self
    where
        V: Any + Clone + Send + Sync,
    {
        let mut policy = Self::with_kind(FallbackKind::Value);
        policy.value_type = Some(TypeId::of::<V>());
        policy.value = Some(Arc::new(value));
        policy
    }

    /// Invoke the given callable and yield its result.
    pub fn callable<V, F>(callable: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn() -> V + Send + Sync + 'static,
    {
        let mut policy = Self::with_kind(FallbackKind::Callable);
        policy.callable =
            Some(Arc::new(move || Some(Box::new(callable()) as Box<dyn Any + Send + Sync>)));
        policy
    }

    /// Invoke a fallible callable; a failure means no value is available.
    pub fn fallible_callable<V, F>(callable: F) -> Self
    where
        V: Any + Send + Sync,
        F: Fn() -> Result<V, BoxedError> + Send + Sync + 'static,
    {
        let mut policy = Self::with_kind(FallbackKind::Callable);
        policy.callable = Some(Arc::new(move || match callable() {
            Ok(value) => Some(Box::new(value) as Box<dyn Any + Send + Sync>),
            Err(error) => {
                debug!(error = %error, "Fallback callable failed");
                None
            }
        }));
        policy
    }

    /// Raise [`FallbackError::FallbackRaised`] instead of producing a value.
    pub fn raising() -> Self {
        Self::with_kind(FallbackKind::Throw)
    }

    /// The behavior this policy was constructed with.
    pub fn kind(&self) -> FallbackKind {
        self.kind
    }

    /// Whether a stored value is present.
    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Whether a callable is present.
    pub fn has_callable(&self) -> bool {
        self.callable.is_some()
    }

    /// The runtime type of the stored value, when one is present.
    pub fn stored_type_id(&self) -> Option<TypeId> {
        self.value_type
    }

    /// Whether producing a `T` can possibly yield a value.
    ///
    /// For a callable policy the answer is only known after invoking it, so
    /// this reports `true`.
    pub fn can_produce<T: Any>(&self) -> bool {
        match self.kind {
            FallbackKind::Default | FallbackKind::Callable => true,
            FallbackKind::Value => self.value_type == Some(TypeId::of::<T>()),
            FallbackKind::Throw => false,
        }
    }

    /// Produce a value of type `T` according to the policy's behavior.
    pub fn produce<T>(&self) -> FallbackOutcome<T>
    where
        T: Any + Clone + Default,
    {
        match self.kind {
            FallbackKind::Default => FallbackOutcome::Value(T::default()),
            FallbackKind::Value => {
                match self.value.as_ref().and_then(|value| value.downcast_ref::<T>()) {
                    Some(value) => FallbackOutcome::Value(value.clone()),
                    None => FallbackOutcome::Unavailable,
                }
            }
            FallbackKind::Callable => match self.callable.as_ref().and_then(|callable| callable()) {
                Some(boxed) => match boxed.downcast::<T>() {
                    Ok(value) => FallbackOutcome::Value(*value),
                    Err(_) => FallbackOutcome::Unavailable,
                },
                None => FallbackOutcome::Unavailable,
            },
            FallbackKind::Throw => FallbackOutcome::Raised,
        }
    }

    /// Produce a value or return the given default when none is produced.
    pub fn produce_or<T>(&self, default: T) -> T
    where
        T: Any + Clone + Default,
    {
        match self.produce::<T>() {
            FallbackOutcome::Value(value) => value,
            FallbackOutcome::Unavailable | FallbackOutcome::Raised => default,
        }
    }

    /// Produce a value with a discriminated error on every non-value
    /// outcome.
    pub fn try_produce<T>(&self) -> Result<T, FallbackError>
    where
        T: Any + Clone + Default,
    {
        match self.produce::<T>() {
            FallbackOutcome::Value(value) => Ok(value),
            FallbackOutcome::Unavailable => Err(FallbackError::UnableToProduceValue),
            FallbackOutcome::Raised => Err(FallbackError::FallbackRaised),
        }
    }
}
