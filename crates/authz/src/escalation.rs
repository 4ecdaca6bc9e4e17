//! Escalation prevention for token create, update and refresh.
//!
//! A caller may only hand out what it holds. Every `(method, subject)` pair
//! implied by the requested grants must be authorized for the acting token,
//! and every requested role must be at most the role held for the same
//! subject. The check runs twice:
//!
//! 1. Against the acting token's own grants. A failure is reported as
//!    [`AuthzError::InsufficientToken`] or [`AuthzError::RoleEscalation`].
//! 2. Against the acting identity's live memberships, re-queried from the
//!    membership source. The held set is rebuilt from roles alone, each
//!    capped to the live role, so explicit permissions and the infra role
//!    the token carries only pass when a live role still covers them. A
//!    failure here is reported as [`AuthzError::OutdatedToken`].
//!
//! Both outcomes are terminal permission denials; they differ only in the
//! message shown to the user.

use std::sync::Arc;

use apiguard_authn::{AdminRole, Grants, ProjectRole, TenantRole, Token};

use crate::{
    config::AuthzConfig,
    error::{AuthzError, Result},
    membership::{CachedMembership, ProjectsAndTenants},
    permissions::{ANY_SUBJECT, MethodVisibility, ServicePermissions, effective_permissions},
};

/// What the held grants were derived from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Basis {
    Token,
    Membership,
}

impl Basis {
    fn missing(self, grant: &str, subject: &str) -> AuthzError {
        let (grant, subject) = (grant.to_string(), subject.to_string());
        match self {
            Self::Token => AuthzError::InsufficientToken { grant, subject },
            Self::Membership => AuthzError::OutdatedToken { grant, subject },
        }
    }

    fn role_exceeded(self, subject: &str, requested: &str, held: &str) -> AuthzError {
        match self {
            Self::Token => AuthzError::RoleEscalation {
                subject: subject.to_string(),
                requested: requested.to_string(),
                held: held.to_string(),
            },
            Self::Membership => self.missing(requested, subject),
        }
    }
}

/// Refuses requested grants the acting identity does not hold.
#[derive(Clone, Debug)]
pub struct EscalationGuard {
    permissions: Arc<ServicePermissions>,
    membership: CachedMembership,
    config: AuthzConfig,
}

impl EscalationGuard {
    /// Creates a guard over the method table and membership source.
    #[must_use]
    pub fn new(
        permissions: Arc<ServicePermissions>,
        membership: CachedMembership,
        config: AuthzConfig,
    ) -> Self {
        Self { permissions, membership, config }
    }

    /// The membership cache used for ground-truth checks.
    #[must_use]
    pub fn membership(&self) -> &CachedMembership {
        &self.membership
    }

    /// The admin role `user_id` is entitled to, given its live memberships.
    ///
    /// Only allow-listed logins holding at least editor in the admin tenant
    /// qualify.
    #[must_use]
    pub fn admin_role_for(&self, user_id: &str, live: &ProjectsAndTenants) -> Option<AdminRole> {
        let tenant = self.config.admin_tenant()?;
        (self.config.is_admin_subject(user_id) && live.tenant_role(tenant) >= TenantRole::Editor)
            .then_some(AdminRole::Editor)
    }

    /// Checks that `acting` may hand out `requested`.
    ///
    /// # Errors
    ///
    /// [`AuthzError::AdminElevationDenied`], [`AuthzError::InsufficientToken`],
    /// [`AuthzError::RoleEscalation`] or [`AuthzError::OutdatedToken`] on a
    /// denial; [`AuthzError::Membership`] if the live lookup fails.
    #[tracing::instrument(skip_all, fields(user_id = %acting.user_id))]
    pub async fn check(&self, acting: &Token, requested: &Grants) -> Result<()> {
        let result = self.evaluate(acting, requested).await;
        match &result {
            Err(err) if !err.is_internal() => tracing::warn!(
                audit.action = "escalation_denied",
                audit.user_id = %acting.user_id,
                audit.token_id = %acting.uuid,
                error = %err,
                "audit_event"
            ),
            _ => {},
        }
        result
    }

    async fn evaluate(&self, acting: &Token, requested: &Grants) -> Result<()> {
        let admin_requested = requested.admin_role.is_some();
        if !admin_requested && acting.is_admin() {
            return Ok(());
        }
        if !acting.is_admin() {
            self.check_subset(&acting.grants, requested, Basis::Token)?;
        }
        if !admin_requested && !self.needs_ground_truth(requested) {
            return Ok(());
        }

        let live = self.membership.force_refresh(&acting.user_id).await?;
        if let Some(role) = requested.admin_role {
            let entitled = self.admin_role_for(&acting.user_id, &live);
            if entitled.is_none_or(|entitled| role > entitled) {
                return Err(AuthzError::AdminElevationDenied { user_id: acting.user_id.clone() });
            }
        }
        if acting.is_admin() {
            return Ok(());
        }

        self.check_subset(&live_grants(&acting.grants, &live), requested, Basis::Membership)
    }

    /// Whether anything requested depends on memberships.
    fn needs_ground_truth(&self, requested: &Grants) -> bool {
        !requested.project_roles.is_empty()
            || !requested.tenant_roles.is_empty()
            || effective_permissions(requested, &self.permissions)
                .pairs()
                .any(|(method, _)| !self.permissions.is_implicit(method))
    }

    fn check_subset(&self, held: &Grants, requested: &Grants, basis: Basis) -> Result<()> {
        for (project, &role) in &requested.project_roles {
            let have = held.project_roles.get(project).copied().unwrap_or(ProjectRole::Unspecified);
            if role > have {
                return Err(basis.role_exceeded(project, role.as_str(), have.as_str()));
            }
        }
        for (tenant, &role) in &requested.tenant_roles {
            let have = held.tenant_roles.get(tenant).copied().unwrap_or(TenantRole::Unspecified);
            if role > have {
                return Err(basis.role_exceeded(tenant, role.as_str(), have.as_str()));
            }
        }
        if let Some(role) = requested.infra_role {
            if held.infra_role.is_none_or(|have| role > have) {
                let have = held.infra_role.map_or("none", |have| have.as_str());
                return Err(basis.role_exceeded(ANY_SUBJECT, role.as_str(), have));
            }
        }

        let held = effective_permissions(held, &self.permissions);
        let wanted = effective_permissions(requested, &self.permissions);
        for (method, subject) in wanted.pairs() {
            let allowed = match self.permissions.visibility(method) {
                MethodVisibility::Public | MethodVisibility::SelfService => true,
                MethodVisibility::AdminOnly => false,
                MethodVisibility::Scoped => held.covers(method, subject),
            };
            if !allowed {
                return Err(basis.missing(method, subject));
            }
        }
        Ok(())
    }
}

/// The project and tenant roles of `grants`, each capped at the live role.
/// Roles no longer held at all are dropped. Explicit permissions and the
/// infra role have no membership behind them and are not carried over.
fn live_grants(grants: &Grants, live: &ProjectsAndTenants) -> Grants {
    let project_roles = grants
        .project_roles
        .iter()
        .map(|(project, &role)| (project.clone(), role.min(live.project_role(project))))
        .filter(|(_, role)| *role > ProjectRole::Unspecified)
        .collect();
    let tenant_roles = grants
        .tenant_roles
        .iter()
        .map(|(tenant, &role)| (tenant.clone(), role.min(live.tenant_role(tenant))))
        .filter(|(_, role)| *role > TenantRole::Unspecified)
        .collect();

    Grants { project_roles, tenant_roles, ..Grants::default() }
}
