//! Shared test utilities for authorization testing.
//!
//! A small but realistic method table, an in-memory [`MembershipSource`],
//! and an [`AuthzHarness`] that wires the token service on top of
//! [`AuthnHarness`]. Feature-gated behind `testutil`.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use apiguard_authn::{
    Grants, InfraRole, ProjectRole, TenantRole, Token, testutil::AuthnHarness,
};
use apiguard_storage::{BoxError, StorageError};
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{
    authorizer::Authorizer,
    config::AuthzConfig,
    escalation::EscalationGuard,
    membership::{CachedMembership, MembershipSource, ProjectsAndTenants},
    permissions::ServicePermissions,
    service::TokenService,
};

/// Login on the admin allow-list of [`AuthzHarness`].
pub const ADMIN_LOGIN: &str = "root@github";

/// Admin tenant of [`AuthzHarness`].
pub const ADMIN_TENANT: &str = "t-operations";

/// Method names used by [`sample_permissions`].
pub mod methods {
    /// Public.
    pub const VERSION_GET: &str = "/apiguard.v1.VersionService/Get";
    /// Self-service.
    pub const TOKEN_LIST: &str = "/apiguard.v1.TokenService/List";
    /// Self-service.
    pub const TOKEN_CREATE: &str = "/apiguard.v1.TokenService/Create";
    /// Self-service.
    pub const TOKEN_REFRESH: &str = "/apiguard.v1.TokenService/Refresh";
    /// Admin only.
    pub const ADMIN_LIST_TOKENS: &str = "/apiguard.admin.v1.TokenService/List";
    /// Admin only.
    pub const ADMIN_REVOKE_TOKEN: &str = "/apiguard.admin.v1.TokenService/Revoke";
    /// Project viewer and up.
    pub const IMAGE_GET: &str = "/apiguard.v1.ImageService/Get";
    /// Project editor and up.
    pub const IMAGE_CREATE: &str = "/apiguard.v1.ImageService/Create";
    /// Project owner only.
    pub const PROJECT_DELETE: &str = "/apiguard.v1.ProjectService/Delete";
    /// Tenant viewer and up.
    pub const TENANT_GET: &str = "/apiguard.v1.TenantService/Get";
    /// Tenant editor and up.
    pub const TENANT_UPDATE: &str = "/apiguard.v1.TenantService/Update";
    /// Infra viewer and up.
    pub const SWITCH_GET: &str = "/apiguard.infra.v1.SwitchService/Get";
    /// Infra editor.
    pub const SWITCH_REGISTER: &str = "/apiguard.infra.v1.SwitchService/Register";
}

/// A method table covering every visibility and role kind.
#[must_use]
pub fn sample_permissions() -> ServicePermissions {
    use methods::*;

    ServicePermissions::new()
        .public([VERSION_GET])
        .self_service([TOKEN_LIST, TOKEN_CREATE, TOKEN_REFRESH])
        .admin_only([ADMIN_LIST_TOKENS, ADMIN_REVOKE_TOKEN])
        .project_role(ProjectRole::Viewer, [IMAGE_GET])
        .project_role(ProjectRole::Editor, [IMAGE_GET, IMAGE_CREATE])
        .project_role(ProjectRole::Owner, [IMAGE_GET, IMAGE_CREATE, PROJECT_DELETE])
        .tenant_role(TenantRole::Viewer, [TENANT_GET])
        .tenant_role(TenantRole::Editor, [TENANT_GET, TENANT_UPDATE])
        .tenant_role(TenantRole::Owner, [TENANT_GET, TENANT_UPDATE])
        .infra_role(InfraRole::Viewer, [SWITCH_GET])
        .infra_role(InfraRole::Editor, [SWITCH_GET, SWITCH_REGISTER])
}

/// In-memory [`MembershipSource`]. Unknown users have no memberships.
#[derive(Default)]
pub struct StaticMembership {
    entries: RwLock<HashMap<String, ProjectsAndTenants>>,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StaticMembership {
    /// Replaces the memberships of `user_id`.
    pub fn set(&self, user_id: &str, memberships: ProjectsAndTenants) {
        self.entries.write().insert(user_id.to_string(), memberships);
    }

    /// Makes every lookup fail while `fail` is set.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Number of lookups served, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MembershipSource for StaticMembership {
    async fn projects_and_tenants(
        &self,
        user_id: &str,
    ) -> std::result::Result<ProjectsAndTenants, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Arc::new(StorageError::connection("membership directory unavailable")));
        }
        Ok(self.entries.read().get(user_id).cloned().unwrap_or_default())
    }
}

/// Configuration allowing [`ADMIN_LOGIN`] to hold admin roles.
///
/// # Panics
///
/// Never; the values satisfy every invariant.
pub fn test_config() -> AuthzConfig {
    AuthzConfig::builder()
        .admin_subjects(vec![ADMIN_LOGIN.to_string()])
        .admin_tenant(ADMIN_TENANT)
        .build()
        .expect("valid test config")
}

/// The authorization components over an [`AuthnHarness`].
pub struct AuthzHarness {
    /// Authentication components.
    pub authn: AuthnHarness,
    /// Membership source; edit it to change live roles.
    pub membership: Arc<StaticMembership>,
    /// Method table.
    pub permissions: Arc<ServicePermissions>,
    /// Authorizer.
    pub authorizer: Authorizer,
    /// Escalation guard.
    pub guard: EscalationGuard,
    /// Token service.
    pub service: TokenService,
}

impl AuthzHarness {
    /// Wires a harness over [`sample_permissions`] and [`test_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Wires a harness over [`sample_permissions`] and `config`.
    #[must_use]
    pub fn with_config(config: AuthzConfig) -> Self {
        let authn = AuthnHarness::new();
        let membership = Arc::new(StaticMembership::default());
        let permissions = Arc::new(sample_permissions());

        let source: Arc<dyn MembershipSource> = membership.clone();
        let cached = CachedMembership::new(source, config.membership_cache_ttl());
        let guard = EscalationGuard::new(permissions.clone(), cached, config);
        let service = TokenService::new(
            authn.certs.clone(),
            authn.tokens.clone(),
            authn.issuer.clone(),
            &authn.config,
            guard.clone(),
        );
        let authorizer = Authorizer::new(permissions.clone());

        Self { authn, membership, permissions, authorizer, guard, service }
    }

    /// Mints and stores a one-hour API token for `user_id` carrying
    /// `grants`, bypassing every check.
    pub async fn token_for(&self, user_id: &str, grants: Grants) -> Token {
        self.authn.mint(user_id, grants, Duration::from_secs(3600)).await.1
    }
}

impl Default for AuthzHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_roles_are_nested() {
        let table = sample_permissions();
        for pair in ProjectRole::ALL.windows(2) {
            let lower = table.project_methods(pair[0]);
            let higher = table.project_methods(pair[1]);
            assert!(lower.iter().all(|m| higher.contains(m)), "{:?} exceeds {:?}", pair[0], pair[1]);
        }
    }

    #[tokio::test]
    async fn test_static_membership_counts_calls() {
        let source = StaticMembership::default();
        source.set("x", ProjectsAndTenants::default().with_project("p1", ProjectRole::Owner));
        assert_eq!(
            source.projects_and_tenants("x").await.unwrap().project_role("p1"),
            ProjectRole::Owner
        );
        assert!(source.projects_and_tenants("y").await.unwrap().projects.is_empty());
        assert_eq!(source.calls(), 2);
    }
}
