//! Error types for the `zerorag-core` crate.

use thiserror::Error;

/// Errors that can occur across the ZeroRAG engine.
///
/// Variants map one-to-one onto the error taxonomy used by the HTTP layer:
/// callers can branch on the kind without parsing messages.
#[derive(Debug, Error)]
pub enum ZeroRagError {
    /// Caller-side input was rejected (bad file, oversized upload, invalid query).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A retryable failure in an external collaborator (backend timeout,
    /// generator overloaded). Surfaces as 503 once retries are exhausted.
    #[error("transient failure ({component}): {message}")]
    Transient {
        /// The collaborator that produced the error.
        component: String,
        /// A description of the failure.
        message: String,
    },

    /// A non-retryable failure in an external collaborator.
    #[error("permanent failure ({component}): {message}")]
    Permanent {
        /// The collaborator that produced the error.
        component: String,
        /// A description of the failure.
        message: String,
    },

    /// A state precondition failed (duplicate id, dimension mismatch).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The background operation queue is saturated; callers should back off.
    #[error("operation queue is full")]
    QueueFull,

    /// A throughput limit was hit.
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the caller's bucket refills enough to admit a request.
        retry_after_secs: u64,
    },

    /// Cooperative cancellation, deadline expiry, or client disconnect.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ZeroRagError {
    /// Build a [`ZeroRagError::Transient`] for the given component.
    pub fn transient(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient { component: component.into(), message: message.into() }
    }

    /// Build a [`ZeroRagError::Permanent`] for the given component.
    pub fn permanent(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent { component: component.into(), message: message.into() }
    }

    /// Whether retrying the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::QueueFull)
    }
}

/// A convenience result type for ZeroRAG operations.
pub type Result<T> = std::result::Result<T, ZeroRagError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert!(ZeroRagError::transient("qdrant", "timeout").is_transient());
        assert!(ZeroRagError::QueueFull.is_transient());
        assert!(!ZeroRagError::permanent("qdrant", "bad request").is_transient());
        assert!(!ZeroRagError::Validation("empty query".into()).is_transient());
    }

    #[test]
    fn display_includes_component() {
        let err = ZeroRagError::transient("embedder", "connection refused");
        assert_eq!(err.to_string(), "transient failure (embedder): connection refused");
    }
}
