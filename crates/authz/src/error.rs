//! Authorization error types.
//!
//! Denials carry enough context for a user-facing message; internal
//! failures wrap their source so the full chain can be logged before the
//! transport layer replaces it with a generic status.

use apiguard_authn::AuthError;
use apiguard_storage::{BoxError, StorageError};
use thiserror::Error;
use uuid::Uuid;

/// Authorization errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthzError {
    /// The method is absent from the caller's effective permissions.
    #[error("method not allowed: {method}")]
    MethodNotAllowed {
        /// The method that was called.
        method: String,
    },

    /// The method is granted, but not for the targeted subject.
    #[error("subject not allowed: {subject} for {method}")]
    SubjectNotAllowed {
        /// The method that was called.
        method: String,
        /// The project or tenant the call targets.
        subject: String,
    },

    /// A non-public method was called without a credential.
    #[error("authentication required")]
    MissingIdentity,

    /// The acting token does not itself hold a requested grant.
    #[error("insufficient token: {grant} on {subject} is not held by the requesting token")]
    InsufficientToken {
        /// The method or role being requested.
        grant: String,
        /// Where it was requested.
        subject: String,
    },

    /// The acting token claims a requested grant that the caller's live
    /// memberships no longer back.
    #[error("outdated token: {grant} on {subject} is no longer held; sign in again")]
    OutdatedToken {
        /// The method or role being requested.
        grant: String,
        /// Where it was requested.
        subject: String,
    },

    /// A requested role is above the role held for the same subject.
    #[error("cannot grant {requested} on {subject}: requesting token holds {held}")]
    RoleEscalation {
        /// The project or tenant.
        subject: String,
        /// Requested role.
        requested: String,
        /// Role held by the requesting token.
        held: String,
    },

    /// An admin role was requested by someone not entitled to one.
    #[error("admin role may not be granted to {user_id}")]
    AdminElevationDenied {
        /// The requesting identity.
        user_id: String,
    },

    /// The operation needs an admin token.
    #[error("admin role required")]
    AdminRequired,

    /// No live token record with this id belongs to the caller.
    #[error("token not found: {0}")]
    TokenNotFound(Uuid),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The membership source failed.
    #[error("membership lookup failed: {message}")]
    Membership {
        /// Description of the failure.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Authentication component error.
    #[error(transparent)]
    Authn(#[from] AuthError),

    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl AuthzError {
    /// Creates an [`AuthzError::MethodNotAllowed`].
    #[must_use]
    pub fn method_not_allowed(method: impl Into<String>) -> Self {
        Self::MethodNotAllowed { method: method.into() }
    }

    /// Creates an [`AuthzError::Membership`] without a source.
    #[must_use]
    pub fn membership(message: impl Into<String>) -> Self {
        Self::Membership { message: message.into(), source: None }
    }

    /// Returns `true` for server-side failures that must surface as an
    /// internal error rather than as a denial.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        match self {
            Self::Membership { .. } | Self::Storage(_) => true,
            Self::Authn(err) => err.is_internal(),
            _ => false,
        }
    }
}

/// Result type alias for authorization operations.
pub type Result<T> = std::result::Result<T, AuthzError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_denials_are_not_internal() {
        let denials = [
            AuthzError::method_not_allowed("/svc/M"),
            AuthzError::MissingIdentity,
            AuthzError::InsufficientToken { grant: "/svc/M".into(), subject: "p1".into() },
            AuthzError::OutdatedToken { grant: "/svc/M".into(), subject: "p1".into() },
            AuthzError::AdminRequired,
            AuthzError::Authn(AuthError::TokenRevoked),
        ];
        for denial in denials {
            assert!(!denial.is_internal(), "{denial} must not be internal");
        }
    }

    #[test]
    fn test_failures_are_internal() {
        assert!(AuthzError::membership("directory unavailable").is_internal());
        assert!(AuthzError::from(StorageError::Timeout).is_internal());
        assert!(AuthzError::Authn(AuthError::Signing("x".into())).is_internal());
    }

    #[test]
    fn test_messages_distinguish_outdated_from_insufficient() {
        let insufficient =
            AuthzError::InsufficientToken { grant: "/svc/M".into(), subject: "p1".into() };
        let outdated = AuthzError::OutdatedToken { grant: "/svc/M".into(), subject: "p1".into() };
        assert!(insufficient.to_string().starts_with("insufficient token"));
        assert!(outdated.to_string().starts_with("outdated token"));
    }
}
