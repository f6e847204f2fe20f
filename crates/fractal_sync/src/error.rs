//! Error types for plan execution.

use fractal_cache::CacheError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised while fetching or reconciling.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The network adapter failed.
    #[error("adapter error: {message}")]
    Adapter {
        /// Error message.
        message: String,
        /// Whether the request can be retried.
        retryable: bool,
    },

    /// Writing a response into the cache failed.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Execution was cancelled.
    #[error("execution cancelled")]
    Cancelled,

    /// A concurrent fetch task panicked or was aborted.
    #[error("task join error: {0}")]
    Join(String),

    /// A response does not fit the request it answers.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Creates a retryable adapter error.
    pub fn adapter_retryable(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable adapter error.
    pub fn adapter_fatal(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            retryable: false,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if the failed operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Adapter { retryable: true, .. })
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::adapter_retryable("connection reset").is_retryable());
        assert!(!SyncError::adapter_fatal("bad filter").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::protocol("short response").is_retryable());
    }

    #[test]
    fn cache_errors_convert() {
        let err: SyncError = CacheError::consistency("reversed interval").into();
        assert!(matches!(err, SyncError::Cache(_)));
        assert_eq!(
            err.to_string(),
            "cache error: consistency error: reversed interval"
        );
    }
}
