//! Error types shared across the crate.
//!
//! Failures are represented as structured error values. The generic
//! [`RampartError`] wraps the caller's operation error and preserves it as a
//! `source`, so the original failure stays reachable through the standard
//! error chain.

use thiserror::Error;

/// Boxed error type for fallible callable payloads and simple errors.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Simple configuration error for validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    /// Build an `Invalid` error from any displayable message.
    pub fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors produced while resolving a fallback value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FallbackError {
    /// No value of the requested type could be produced.
    #[error("Unable to produce a fallback value for the requested type")]
    UnableToProduceValue,

    /// The fallback policy was configured to raise.
    #[error("Fallback policy was configured to raise")]
    FallbackRaised,
}

/// Errors surfaced by a composed circuit run.
///
/// This error type is generic over the underlying operation error type `E`,
/// so an unhandled operation failure propagates unchanged as
/// [`RampartError::OperationFailed`].
#[derive(Debug, Error)]
pub enum RampartError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// Admission was denied by the circuit breaker and no fallback value
    /// could be produced.
    #[error("Circuit '{name}' is open and no fallback value could be produced")]
    OpenCircuit { name: String },

    /// The fallback policy was configured to raise.
    #[error("Fallback policy was configured to raise")]
    FallbackRaised,

    /// No value of the caller's result type could be produced.
    #[error("Unable to produce a value for the requested type")]
    UnableToProduceValue,

    /// The operation failed with an error outside the handled set.
    #[error("Operation failed")]
    OperationFailed {
        #[source]
        source: E,
    },
}

impl<E> From<FallbackError> for RampartError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: FallbackError) -> Self {
        match error {
            FallbackError::UnableToProduceValue => RampartError::UnableToProduceValue,
            FallbackError::FallbackRaised => RampartError::FallbackRaised,
        }
    }
}

/// Result type for composed circuit runs.
pub type RampartResult<T, E> = Result<T, RampartError<E>>;
