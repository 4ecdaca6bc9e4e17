//! Per-call allow/deny decisions.

use std::sync::Arc;

use apiguard_authn::Token;

use crate::{
    error::{AuthzError, Result},
    permissions::{MethodVisibility, ServicePermissions, effective_permissions},
};

/// Decides whether a caller may invoke a method.
///
/// Order of checks:
///
/// 1. Public methods are allowed for everyone, including anonymous callers.
/// 2. Any other method requires a token.
/// 3. A token with an admin role is allowed everything.
/// 4. Admin-only methods are denied to everyone else.
/// 5. Self-service methods are allowed to every token.
/// 6. Everything else is decided by the token's effective permissions.
#[derive(Clone, Debug)]
pub struct Authorizer {
    permissions: Arc<ServicePermissions>,
}

impl Authorizer {
    /// Creates an authorizer over the static method table.
    #[must_use]
    pub fn new(permissions: Arc<ServicePermissions>) -> Self {
        Self { permissions }
    }

    /// The method table in use.
    #[must_use]
    pub fn permissions(&self) -> &ServicePermissions {
        &self.permissions
    }

    /// Authorizes a call to `method`, optionally targeting `subject`.
    ///
    /// # Errors
    ///
    /// [`AuthzError::MissingIdentity`], [`AuthzError::MethodNotAllowed`] or
    /// [`AuthzError::SubjectNotAllowed`].
    pub fn authorize(
        &self,
        token: Option<&Token>,
        method: &str,
        subject: Option<&str>,
    ) -> Result<()> {
        let result = self.decide(token, method, subject);
        if let Err(err) = &result {
            tracing::debug!(
                method,
                subject = subject.unwrap_or_default(),
                user_id = token.map(|t| t.user_id.as_str()).unwrap_or_default(),
                error = %err,
                "call denied"
            );
        }
        result
    }

    fn decide(&self, token: Option<&Token>, method: &str, subject: Option<&str>) -> Result<()> {
        let visibility = self.permissions.visibility(method);
        if visibility == MethodVisibility::Public {
            return Ok(());
        }

        let token = token.ok_or(AuthzError::MissingIdentity)?;
        if token.is_admin() {
            return Ok(());
        }

        match visibility {
            MethodVisibility::AdminOnly => Err(AuthzError::method_not_allowed(method)),
            MethodVisibility::SelfService => Ok(()),
            _ => effective_permissions(&token.grants, &self.permissions).check(method, subject),
        }
    }
}
