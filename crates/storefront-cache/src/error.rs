//! Error types for the key-value store abstraction.
//!
//! A cache miss is modelled as an error variant so that `?` propagates it,
//! but callers are expected to branch on it explicitly via [`CacheError::is_miss`].

use crate::types::CacheType;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No live entry exists for the key.
    #[error("cache miss: {key}")]
    Miss {
        /// The key that was looked up.
        key: String,
    },

    /// The remote store could not be reached.
    #[error("cache backend unavailable during {operation} on '{key}': {message}")]
    BackendUnavailable {
        /// The store operation that failed.
        operation: &'static str,
        /// The key the operation targeted.
        key: String,
        /// Description of the connection failure.
        message: String,
    },

    /// The remote store rejected the command.
    #[error("cache backend error during {operation} on '{key}': {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// A payload could not be encoded or decoded.
    #[error("serialization failed during {operation} on '{key}': {message}")]
    Serialization {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// The active backend lacks the capability the operation needs.
    #[error("{backend} backend does not support {operation}")]
    BackendTypeMismatch {
        /// The backend that was asked.
        backend: CacheType,
        /// The unsupported operation.
        operation: &'static str,
    },

    /// The key holds a value of a different kind than the operation expects.
    #[error("{operation} against '{key}' which holds the wrong kind of value")]
    WrongType { operation: &'static str, key: String },

    /// The caller canceled the operation before it completed.
    #[error("{operation} on '{key}' canceled")]
    Canceled { operation: &'static str, key: String },

    /// The operation did not complete before the caller's deadline.
    #[error("{operation} on '{key}' exceeded its deadline")]
    DeadlineExceeded { operation: &'static str, key: String },

    /// The configured backend identifier is not recognised.
    #[error("unsupported cache type: {0}")]
    UnsupportedBackend(String),

    /// The backend could not be constructed from its configuration.
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    /// Creates a new `Miss` error.
    #[must_use]
    pub fn miss(key: impl Into<String>) -> Self {
        Self::Miss { key: key.into() }
    }

    /// Creates a new `Serialization` error.
    #[must_use]
    pub fn serialization(
        operation: &'static str,
        key: impl Into<String>,
        message: impl std::fmt::Display,
    ) -> Self {
        Self::Serialization {
            operation,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Creates a new `WrongType` error.
    #[must_use]
    pub fn wrong_type(operation: &'static str, key: impl Into<String>) -> Self {
        Self::WrongType {
            operation,
            key: key.into(),
        }
    }

    /// Creates a new `BackendTypeMismatch` error.
    #[must_use]
    pub fn unsupported(backend: CacheType, operation: &'static str) -> Self {
        Self::BackendTypeMismatch { backend, operation }
    }

    /// Returns `true` if this is a cache miss.
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss { .. })
    }

    /// Returns `true` for infrastructure failures a caller may retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::BackendUnavailable { .. } | Self::DeadlineExceeded { .. }
        )
    }

    /// Returns `true` if the operation was abandoned by its caller.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled { .. } | Self::DeadlineExceeded { .. })
    }
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
