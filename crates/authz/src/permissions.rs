//! The static method table and effective-permission computation.
//!
//! A token grants methods through four independent sources:
//!
//! | Source | Scope |
//! |---|---|
//! | explicit `permissions` | the subject named in each entry |
//! | `project_roles[p]` | `p` |
//! | `tenant_roles[t]` | `t` |
//! | `infra_role` | every subject (`"*"`) |
//!
//! [`effective_permissions`] merges them into one [`EffectivePermissions`]
//! map. It is a pure function of the token grants and the
//! [`ServicePermissions`] table, so the authorizer and the escalation guard
//! compute it identically.

use std::collections::{BTreeMap, BTreeSet};

use apiguard_authn::{Grants, InfraRole, ProjectRole, TenantRole};

use crate::error::{AuthzError, Result};

/// Subject wildcard: the method may target any subject.
pub const ANY_SUBJECT: &str = "*";

/// How a method is guarded.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MethodVisibility {
    /// Callable without a credential.
    Public,
    /// Callable by any authenticated identity, about its own resources.
    SelfService,
    /// Callable only with an admin token.
    AdminOnly,
    /// Callable when the effective permission map allows it.
    Scoped,
}

/// The static role and visibility table for every service method.
///
/// Role entries list exactly the methods a role grants; no role implicitly
/// includes the methods of a lower one.
///
/// # Example
///
/// ```
/// use apiguard_authn::ProjectRole;
/// use apiguard_authz::{MethodVisibility, ServicePermissions};
///
/// let table = ServicePermissions::new()
///     .public(["/api.v1.Version/Get"])
///     .project_role(ProjectRole::Viewer, ["/api.v1.Image/Get"]);
///
/// assert_eq!(table.visibility("/api.v1.Version/Get"), MethodVisibility::Public);
/// assert_eq!(table.visibility("/api.v1.Image/Get"), MethodVisibility::Scoped);
/// ```
#[derive(Clone, Debug, Default)]
pub struct ServicePermissions {
    public: BTreeSet<String>,
    self_service: BTreeSet<String>,
    admin_only: BTreeSet<String>,
    project_roles: BTreeMap<ProjectRole, Vec<String>>,
    tenant_roles: BTreeMap<TenantRole, Vec<String>>,
    infra_roles: BTreeMap<InfraRole, Vec<String>>,
}

fn owned(methods: impl IntoIterator<Item = impl Into<String>>) -> impl Iterator<Item = String> {
    methods.into_iter().map(Into::into)
}

impl ServicePermissions {
    /// An empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `methods` as callable anonymously.
    #[must_use]
    pub fn public(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.public.extend(owned(methods));
        self
    }

    /// Marks `methods` as callable by any authenticated identity.
    #[must_use]
    pub fn self_service(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.self_service.extend(owned(methods));
        self
    }

    /// Marks `methods` as admin-only.
    #[must_use]
    pub fn admin_only(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.admin_only.extend(owned(methods));
        self
    }

    /// Adds `methods` to what `role` grants on a project.
    #[must_use]
    pub fn project_role(
        mut self,
        role: ProjectRole,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.project_roles.entry(role).or_default().extend(owned(methods));
        self
    }

    /// Adds `methods` to what `role` grants on a tenant.
    #[must_use]
    pub fn tenant_role(
        mut self,
        role: TenantRole,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.tenant_roles.entry(role).or_default().extend(owned(methods));
        self
    }

    /// Adds `methods` to what `role` grants everywhere.
    #[must_use]
    pub fn infra_role(
        mut self,
        role: InfraRole,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.infra_roles.entry(role).or_default().extend(owned(methods));
        self
    }

    /// How `method` is guarded. Methods absent from every set are
    /// [`MethodVisibility::Scoped`].
    #[must_use]
    pub fn visibility(&self, method: &str) -> MethodVisibility {
        if self.public.contains(method) {
            MethodVisibility::Public
        } else if self.admin_only.contains(method) {
            MethodVisibility::AdminOnly
        } else if self.self_service.contains(method) {
            MethodVisibility::SelfService
        } else {
            MethodVisibility::Scoped
        }
    }

    /// Whether every authenticated identity holds `method` implicitly.
    #[must_use]
    pub fn is_implicit(&self, method: &str) -> bool {
        matches!(self.visibility(method), MethodVisibility::Public | MethodVisibility::SelfService)
    }

    /// Methods granted by `role` on a project.
    #[must_use]
    pub fn project_methods(&self, role: ProjectRole) -> &[String] {
        self.project_roles.get(&role).map(Vec::as_slice).unwrap_or_default()
    }

    /// Methods granted by `role` on a tenant.
    #[must_use]
    pub fn tenant_methods(&self, role: TenantRole) -> &[String] {
        self.tenant_roles.get(&role).map(Vec::as_slice).unwrap_or_default()
    }

    /// Methods granted by `role` everywhere.
    #[must_use]
    pub fn infra_methods(&self, role: InfraRole) -> &[String] {
        self.infra_roles.get(&role).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Method name to the set of subjects it may target.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectivePermissions {
    methods: BTreeMap<String, BTreeSet<String>>,
}

impl EffectivePermissions {
    /// Allows `method` on `subject`.
    pub fn grant(&mut self, method: impl Into<String>, subject: impl Into<String>) {
        self.methods.entry(method.into()).or_default().insert(subject.into());
    }

    /// Whether `method` may target `subject`, directly or through `"*"`.
    #[must_use]
    pub fn covers(&self, method: &str, subject: &str) -> bool {
        self.methods
            .get(method)
            .is_some_and(|subjects| subjects.contains(subject) || subjects.contains(ANY_SUBJECT))
    }

    /// Decides a call to `method`, targeting `subject` when the call is
    /// scoped to one.
    ///
    /// # Errors
    ///
    /// [`AuthzError::MethodNotAllowed`] if the method is absent, or
    /// [`AuthzError::SubjectNotAllowed`] if it is present for other subjects
    /// only.
    pub fn check(&self, method: &str, subject: Option<&str>) -> Result<()> {
        if !self.methods.contains_key(method) {
            return Err(AuthzError::method_not_allowed(method));
        }
        match subject {
            Some(subject) if !self.covers(method, subject) => Err(AuthzError::SubjectNotAllowed {
                method: method.to_string(),
                subject: subject.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Subjects `method` may target.
    pub fn subjects(&self, method: &str) -> impl Iterator<Item = &str> {
        self.methods.get(method).into_iter().flatten().map(String::as_str)
    }

    /// Every `(method, subject)` pair, ordered by method then subject.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.methods.iter().flat_map(|(method, subjects)| {
            subjects.iter().map(move |subject| (method.as_str(), subject.as_str()))
        })
    }

    /// Number of methods with at least one subject.
    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    /// Whether nothing is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

/// Merges every grant source of `grants` through `table`.
///
/// The admin role contributes nothing here; callers short-circuit on it.
#[must_use]
pub fn effective_permissions(grants: &Grants, table: &ServicePermissions) -> EffectivePermissions {
    let mut effective = EffectivePermissions::default();

    for permission in &grants.permissions {
        for method in &permission.methods {
            effective.grant(method, &permission.subject);
        }
    }
    for (project, role) in &grants.project_roles {
        for method in table.project_methods(*role) {
            effective.grant(method, project);
        }
    }
    for (tenant, role) in &grants.tenant_roles {
        for method in table.tenant_methods(*role) {
            effective.grant(method, tenant);
        }
    }
    if let Some(role) = grants.infra_role {
        for method in table.infra_methods(role) {
            effective.grant(method, ANY_SUBJECT);
        }
    }

    effective
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use apiguard_authn::MethodPermission;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    fn table() -> ServicePermissions {
        ServicePermissions::new()
            .public(["/Version/Get"])
            .self_service(["/Token/List"])
            .admin_only(["/Admin/Purge"])
            .project_role(ProjectRole::Viewer, ["/Image/Get"])
            .project_role(ProjectRole::Editor, ["/Image/Get", "/Image/Create"])
            .project_role(ProjectRole::Owner, ["/Image/Get", "/Image/Create", "/Project/Delete"])
            .tenant_role(TenantRole::Editor, ["/Tenant/Update"])
            .infra_role(InfraRole::Viewer, ["/Switch/Get"])
    }

    #[rstest]
    #[case("/Version/Get", MethodVisibility::Public)]
    #[case("/Token/List", MethodVisibility::SelfService)]
    #[case("/Admin/Purge", MethodVisibility::AdminOnly)]
    #[case("/Image/Get", MethodVisibility::Scoped)]
    #[case("/Unlisted/Call", MethodVisibility::Scoped)]
    fn test_visibility(#[case] method: &str, #[case] expected: MethodVisibility) {
        assert_eq!(table().visibility(method), expected);
    }

    #[test]
    fn test_merges_all_sources() {
        let grants = Grants::default()
            .with_permission(MethodPermission::new("p9", ["/Explicit/Call"]))
            .with_project_role("p1", ProjectRole::Editor)
            .with_tenant_role("t1", TenantRole::Editor)
            .with_infra_role(InfraRole::Viewer);

        let effective = effective_permissions(&grants, &table());
        let pairs: Vec<_> = effective.pairs().collect();
        assert_eq!(
            pairs,
            vec![
                ("/Explicit/Call", "p9"),
                ("/Image/Create", "p1"),
                ("/Image/Get", "p1"),
                ("/Switch/Get", "*"),
                ("/Tenant/Update", "t1"),
            ]
        );
    }

    #[test]
    fn test_role_grants_only_its_own_methods() {
        let grants = Grants::default().with_project_role("p1", ProjectRole::Viewer);
        let effective = effective_permissions(&grants, &table());
        assert!(effective.covers("/Image/Get", "p1"));
        assert!(!effective.covers("/Image/Create", "p1"));
    }

    #[test]
    fn test_unspecified_role_grants_nothing() {
        let grants = Grants::default().with_project_role("p1", ProjectRole::Unspecified);
        assert!(effective_permissions(&grants, &table()).is_empty());
    }

    #[test]
    fn test_check_distinguishes_method_and_subject() {
        let grants = Grants::default().with_project_role("p1", ProjectRole::Editor);
        let effective = effective_permissions(&grants, &table());

        effective.check("/Image/Create", Some("p1")).unwrap();
        effective.check("/Image/Create", None).unwrap();
        assert!(matches!(
            effective.check("/Image/Create", Some("p2")),
            Err(AuthzError::SubjectNotAllowed { .. })
        ));
        assert!(matches!(
            effective.check("/Project/Delete", Some("p1")),
            Err(AuthzError::MethodNotAllowed { .. })
        ));
    }

    #[test]
    fn test_wildcard_covers_any_subject() {
        let grants =
            Grants::default().with_permission(MethodPermission::new(ANY_SUBJECT, ["/Image/Get"]));
        let effective = effective_permissions(&grants, &table());
        assert!(effective.covers("/Image/Get", "p1"));
        assert!(effective.covers("/Image/Get", ANY_SUBJECT));
        assert_eq!(effective.subjects("/Image/Get").collect::<Vec<_>>(), vec!["*"]);
    }

    #[test]
    fn test_specific_subject_does_not_cover_wildcard() {
        let grants = Grants::default().with_project_role("p1", ProjectRole::Owner);
        let effective = effective_permissions(&grants, &table());
        assert!(!effective.covers("/Image/Get", ANY_SUBJECT));
    }

    fn arb_project_role() -> impl Strategy<Value = ProjectRole> {
        prop::sample::select(ProjectRole::ALL)
    }

    fn arb_grants() -> impl Strategy<Value = Grants> {
        (
            prop::collection::btree_map("p[0-3]", arb_project_role(), 0..4),
            prop::collection::vec(
                ("(p[0-3]|\\*)", prop::collection::vec("/Image/(Get|Create)", 1..3)),
                0..3,
            ),
            proptest::option::of(prop::sample::select(InfraRole::ALL)),
        )
            .prop_map(|(project_roles, permissions, infra_role)| Grants {
                permissions: permissions
                    .into_iter()
                    .map(|(subject, methods)| MethodPermission::new(subject, methods))
                    .collect(),
                project_roles,
                infra_role,
                ..Grants::default()
            })
    }

    proptest! {
        #[test]
        fn prop_adding_grants_never_removes_pairs(base in arb_grants(), extra in arb_grants()) {
            let table = table();
            let before = effective_permissions(&base, &table);

            let mut merged = base.clone();
            merged.permissions.extend(extra.permissions);
            merged.infra_role = merged.infra_role.or(extra.infra_role);
            for (project, role) in extra.project_roles {
                merged.project_roles.entry(project).or_insert(role);
            }
            let after = effective_permissions(&merged, &table);

            for (method, subject) in before.pairs() {
                prop_assert!(after.covers(method, subject));
            }
        }

        #[test]
        fn prop_check_agrees_with_covers(grants in arb_grants(), subject in "p[0-5]") {
            let effective = effective_permissions(&grants, &table());
            for method in ["/Image/Get", "/Image/Create", "/Switch/Get"] {
                let allowed = effective.check(method, Some(&subject)).is_ok();
                prop_assert_eq!(allowed, effective.covers(method, &subject));
            }
        }
    }
}
