//! Error types for infrastructure calls.

use thiserror::Error;

/// Failure of a single call to an external infrastructure service.
///
/// Leaf components must classify every failure: transient failures may be
/// retried by the caller, permanent ones must not be.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfraError {
    /// The call failed but may succeed if repeated (throttling, timeouts, 5xx).
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    /// The call can never succeed as issued (quota exceeded, invalid template).
    #[error("permanent infrastructure error: {0}")]
    Permanent(String),
}

impl InfraError {
    /// Creates a transient error.
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Creates a permanent error.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The underlying reason without the classification prefix.
    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(r) | Self::Permanent(r) => r,
        }
    }
}
