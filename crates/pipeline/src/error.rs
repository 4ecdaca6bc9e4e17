//! Pipeline errors and their transport status.
//!
//! Every error the guard can produce maps onto exactly one
//! [`tonic::Code`]. Internal failures are logged with their full source chain
//! and replaced by a generic message before they leave the process.

use apiguard_authn::AuthError;
use apiguard_authz::AuthzError;
use apiguard_storage::StorageError;
use thiserror::Error;
use tonic::{Code, Status, metadata::MetadataValue};

/// Metadata key carrying the quota on a rate-limited response.
pub const RATE_LIMIT_HEADER: &str = "x-ratelimit-limit";

const INTERNAL_MESSAGE: &str = "internal error";

/// Errors raised while guarding a call.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GuardError {
    /// The `authorization` header is present but unusable.
    #[error("invalid authorization header: {0}")]
    InvalidHeader(String),

    /// Credential validation failed.
    #[error(transparent)]
    Authn(#[from] AuthError),

    /// The call or a token operation was denied.
    #[error(transparent)]
    Authz(#[from] AuthzError),

    /// The caller exceeded its quota.
    #[error("rate limit reached: at most {limit} requests per minute")]
    RateLimited {
        /// The configured quota.
        limit: u32,
    },

    /// The caller cancelled the call.
    #[error("call cancelled")]
    Cancelled,

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

fn authn_code(err: &AuthError) -> Code {
    match err {
        err if err.is_internal() => Code::Internal,
        AuthError::LifetimeExceeded { .. } => Code::InvalidArgument,
        _ => Code::Unauthenticated,
    }
}

impl GuardError {
    /// The transport status code for this error.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidHeader(_) => Code::Unauthenticated,
            Self::Authn(err) => authn_code(err),
            Self::Authz(err) => match err {
                AuthzError::Authn(inner) => authn_code(inner),
                err if err.is_internal() => Code::Internal,
                AuthzError::MissingIdentity => Code::Unauthenticated,
                AuthzError::TokenNotFound(_) => Code::NotFound,
                AuthzError::InvalidRequest(_) => Code::InvalidArgument,
                _ => Code::PermissionDenied,
            },
            Self::RateLimited { .. } => Code::ResourceExhausted,
            Self::Cancelled => Code::Cancelled,
            Self::Storage(_) => Code::Internal,
        }
    }
}

impl From<GuardError> for Status {
    fn from(err: GuardError) -> Self {
        let code = err.code();
        match code {
            Code::Internal => {
                tracing::error!(
                    error = %err,
                    source = ?std::error::Error::source(&err),
                    "internal error while guarding call"
                );
                Status::new(code, INTERNAL_MESSAGE)
            },
            Code::ResourceExhausted => {
                let mut status = Status::new(code, err.to_string());
                if let GuardError::RateLimited { limit } = err {
                    status.metadata_mut().insert(RATE_LIMIT_HEADER, MetadataValue::from(limit));
                }
                status
            },
            _ => Status::new(code, err.to_string()),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, GuardError>;
