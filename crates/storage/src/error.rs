//! Storage error types and result alias.
//!
//! Every backend maps its internal failures onto [`StorageError`]. Callers
//! higher up treat all variants except [`StorageError::Conflict`] as internal
//! failures that must not leak to remote callers.

use std::sync::Arc;

use thiserror::Error;

/// A shared error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Marked `#[non_exhaustive]`; match expressions outside this crate need a
/// wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A conditional write observed a value different from the expected one.
    ///
    /// Raised by [`compare_and_set`](crate::StorageBackend::compare_and_set)
    /// and by transactions whose conditional writes no longer hold at commit.
    #[error("Transaction conflict")]
    Conflict,

    /// The backend could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Backend-specific failure that fits no other category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// The operation exceeded its time limit.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Returns `true` for optimistic-concurrency conflicts, which callers may
    /// resolve by re-reading and retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict)
    }
}

/// Invalid configuration value, raised by the validating config builders
/// across the workspace.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A required value was empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A value that must be strictly positive was zero.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A value fell outside its allowed interval.
    #[error("{field} must be in {allowed}, got {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable description of the allowed interval.
        allowed: String,
        /// The rejected value.
        value: String,
    },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("JSON encoding failed", err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(StorageError::Conflict.to_string(), "Transaction conflict");
        assert_eq!(StorageError::connection("refused").to_string(), "Connection error: refused");
        assert_eq!(StorageError::internal("boom").to_string(), "Internal error: boom");
        assert_eq!(StorageError::Timeout.to_string(), "Operation timeout");
    }

    #[test]
    fn test_json_error_keeps_source() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = StorageError::from(json_err);
        assert!(matches!(err, StorageError::Serialization { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::OutOfRange {
            field: "counter_ttl",
            allowed: "(1m, 1h)".into(),
            value: "30s".into(),
        };
        assert_eq!(err.to_string(), "counter_ttl must be in (1m, 1h), got 30s");
    }

    #[test]
    fn test_is_conflict() {
        assert!(StorageError::Conflict.is_conflict());
        assert!(!StorageError::Timeout.is_conflict());
    }
}
