//! Property: whenever the acting token cannot itself call some
//! `(method, subject)` pair implied by a requested grant set, creating a
//! token with those grants is denied. Grants the token holds but no live
//! role backs are denied as outdated.
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use apiguard_authn::{
    Grants, InfraRole, MethodPermission, ProjectRole, TenantRole, Token, testutil::AuthnHarness,
};
use apiguard_authz::{
    ANY_SUBJECT, Authorizer, AuthzConfig, AuthzError, CachedMembership, EscalationGuard, MembershipSource,
    ProjectsAndTenants, ServicePermissions, TokenRequest, TokenService, effective_permissions,
};
use apiguard_storage::BoxError;
use async_trait::async_trait;
use proptest::prelude::*;

const METHODS: &[&str] = &[
    "/api.v1.ImageService/Get",
    "/api.v1.ImageService/Create",
    "/api.v1.ProjectService/Delete",
    "/api.v1.TenantService/Update",
    "/api.v1.SwitchService/Get",
    "/api.v1.TokenService/List",
    "/api.admin.v1.TokenService/List",
];

fn table() -> Arc<ServicePermissions> {
    Arc::new(
        ServicePermissions::new()
            .self_service([METHODS[5]])
            .admin_only([METHODS[6]])
            .project_role(ProjectRole::Viewer, [METHODS[0]])
            .project_role(ProjectRole::Editor, [METHODS[0], METHODS[1]])
            .project_role(ProjectRole::Owner, [METHODS[0], METHODS[1], METHODS[2]])
            .tenant_role(TenantRole::Viewer, [METHODS[0]])
            .tenant_role(TenantRole::Owner, [METHODS[3]])
            .infra_role(InfraRole::Viewer, [METHODS[4]]),
    )
}

/// Live memberships mirror whatever the acting token claims.
struct Mirror(ProjectsAndTenants);

#[async_trait]
impl MembershipSource for Mirror {
    async fn projects_and_tenants(&self, _user_id: &str) -> Result<ProjectsAndTenants, BoxError> {
        Ok(self.0.clone())
    }
}

fn arb_subject() -> impl Strategy<Value = String> {
    prop_oneof![Just("p1".to_string()), Just("p2".to_string()), Just("t1".to_string()), Just(ANY_SUBJECT.to_string())]
}

fn arb_grants() -> impl Strategy<Value = Grants> {
    (
        prop::collection::vec(
            (arb_subject(), prop::collection::vec(prop::sample::select(METHODS), 1..3)),
            0..3,
        ),
        prop::collection::btree_map(
            prop_oneof![Just("p1".to_string()), Just("p2".to_string())],
            prop::sample::select(ProjectRole::ALL),
            0..3,
        ),
        prop::collection::btree_map(Just("t1".to_string()), prop::sample::select(TenantRole::ALL), 0..2),
        proptest::option::of(prop::sample::select(InfraRole::ALL)),
    )
        .prop_map(|(permissions, project_roles, tenant_roles, infra_role)| Grants {
            permissions: permissions
                .into_iter()
                .map(|(subject, methods)| MethodPermission::new(subject, methods))
                .collect(),
            project_roles,
            tenant_roles,
            admin_role: None,
            infra_role,
        })
}

/// Whether `requested` names a role above what `acting` holds.
fn exceeds_roles(acting: &Grants, requested: &Grants) -> bool {
    requested.project_roles.iter().any(|(project, role)| {
        *role > acting.project_roles.get(project).copied().unwrap_or(ProjectRole::Unspecified)
    }) || requested.tenant_roles.iter().any(|(tenant, role)| {
        *role > acting.tenant_roles.get(tenant).copied().unwrap_or(TenantRole::Unspecified)
    }) || requested.infra_role > acting.infra_role
}

/// Whether the live re-check would pass: with memberships mirroring the
/// token's roles, only role-derived and implicit pairs survive it.
fn backed_by_roles(acting: &Grants, requested: &Grants, table: &ServicePermissions) -> bool {
    let roles_only = Grants {
        project_roles: acting.project_roles.clone(),
        tenant_roles: acting.tenant_roles.clone(),
        ..Grants::default()
    };
    let live = effective_permissions(&roles_only, table);
    let wanted = effective_permissions(requested, table);
    let needs_live = !requested.project_roles.is_empty()
        || !requested.tenant_roles.is_empty()
        || wanted.pairs().any(|(method, _)| !table.is_implicit(method));

    !needs_live
        || (requested.infra_role.is_none()
            && wanted
                .pairs()
                .all(|(method, subject)| table.is_implicit(method) || live.covers(method, subject)))
}

async fn attempt(acting_grants: Grants, requested: Grants) -> (Token, Result<(), AuthzError>) {
    let authn = AuthnHarness::new();
    let live = ProjectsAndTenants {
        projects: acting_grants.project_roles.clone(),
        tenants: acting_grants.tenant_roles.clone(),
    };
    let config = AuthzConfig::builder().build().unwrap();
    let guard = EscalationGuard::new(
        table(),
        CachedMembership::new(Arc::new(Mirror(live)), config.membership_cache_ttl()),
        config,
    );
    let service = TokenService::new(
        authn.certs.clone(),
        authn.tokens.clone(),
        authn.issuer.clone(),
        &authn.config,
        guard,
    );

    let (_, acting) = authn.mint("prop", acting_grants, Duration::from_secs(3600)).await;
    let request = TokenRequest::builder().lifetime(Duration::from_secs(60)).grants(requested).build();
    let result = service.create(&acting, request).await.map(|_| ());
    (acting, result)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_unauthorized_pair_denies_create(acting_grants in arb_grants(), requested in arb_grants()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        let (acting, result) =
            runtime.block_on(attempt(acting_grants.clone(), requested.clone()));

        let table = table();
        let authorizer = Authorizer::new(table.clone());
        let unauthorized_pair = effective_permissions(&requested, &table)
            .pairs()
            .any(|(method, subject)| authorizer.authorize(Some(&acting), method, Some(subject)).is_err());

        if unauthorized_pair || exceeds_roles(&acting_grants, &requested) {
            let err = result.expect_err("escalation must be denied");
            prop_assert!(!err.is_internal(), "denial expected, got {err:?}");
        } else if backed_by_roles(&acting_grants, &requested, &table) {
            prop_assert!(result.is_ok(), "subset request denied: {result:?}");
        } else {
            let err = result.expect_err("grants without live roles must be denied");
            prop_assert!(matches!(err, AuthzError::OutdatedToken { .. }), "got {err:?}");
        }
    }
}
