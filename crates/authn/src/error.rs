//! Authentication error types.
//!
//! Every variant maps onto one transport status class. Use
//! [`AuthError::is_internal`] to tell the caller-facing "unauthenticated"
//! conditions apart from server-side failures.

use std::{sync::Arc, time::Duration};

use apiguard_storage::StorageError;
use thiserror::Error;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Malformed credential, cannot be decoded.
    #[error("Invalid token format: {0}")]
    InvalidTokenFormat(String),

    /// Credential has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Credential not yet valid (`nbf` in the future).
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// No currently valid verification key accepts the signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Issuer is not in the allow-list.
    #[error("Untrusted issuer: {0}")]
    UntrustedIssuer(String),

    /// Required claim is missing or empty.
    #[error("Missing claim: {0}")]
    MissingClaim(String),

    /// Algorithm not in the accepted list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The credential verifies but its server-side record is gone.
    #[error("Token has been revoked")]
    TokenRevoked,

    /// No verification key is currently published.
    #[error("No verification keys available")]
    NoVerificationKeys,

    /// Requested lifetime exceeds the configured maximum.
    #[error("Requested token lifetime {requested:?} exceeds maximum {max:?}")]
    LifetimeExceeded {
        /// The lifetime that was asked for.
        requested: Duration,
        /// The configured maximum.
        max: Duration,
    },

    /// A published public key could not be parsed.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Key pair or certificate generation failed.
    #[error("Certificate generation failed: {0}")]
    Certificate(String),

    /// Signing a credential failed.
    #[error("Signing failed: {0}")]
    Signing(String),

    /// A persisted record could not be decoded.
    #[error("Corrupt record at {key}: {reason}")]
    CorruptRecord {
        /// The storage key holding the record.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Loading the verification key set failed.
    #[error("Verification key refresh failed: {0}")]
    KeyRefresh(#[source] Arc<AuthError>),

    /// Storage backend error.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),
}

impl AuthError {
    /// Creates an [`AuthError::InvalidTokenFormat`].
    #[must_use]
    pub fn invalid_token_format(message: impl Into<String>) -> Self {
        Self::InvalidTokenFormat(message.into())
    }

    /// Creates an [`AuthError::MissingClaim`].
    #[must_use]
    pub fn missing_claim(claim: impl Into<String>) -> Self {
        Self::MissingClaim(claim.into())
    }

    /// Creates an [`AuthError::InvalidPublicKey`].
    #[must_use]
    pub fn invalid_public_key(message: impl Into<String>) -> Self {
        Self::InvalidPublicKey(message.into())
    }

    /// Creates an [`AuthError::CorruptRecord`].
    #[must_use]
    pub fn corrupt_record(key: impl Into<String>, reason: impl ToString) -> Self {
        Self::CorruptRecord { key: key.into(), reason: reason.to_string() }
    }

    /// Returns `true` for server-side failures that must surface as an
    /// internal error rather than as an authentication failure.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        match self {
            Self::InvalidPublicKey(_)
            | Self::Certificate(_)
            | Self::Signing(_)
            | Self::CorruptRecord { .. }
            | Self::Storage(_) => true,
            Self::KeyRefresh(inner) => inner.is_internal(),
            _ => false,
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::Storage(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
