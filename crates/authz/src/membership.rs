//! Live project and tenant memberships.
//!
//! Memberships belong to an external master-data store. The guard only
//! needs one query from it, "which projects and tenants does this user hold
//! a role in", expressed as [`MembershipSource`]. [`CachedMembership`] keeps
//! recent answers for a short TTL; the escalation guard bypasses the cache
//! with [`CachedMembership::force_refresh`] so its ground-truth check never
//! reads a stale answer.

use std::{collections::BTreeMap, fmt, sync::Arc, time::Duration};

use apiguard_authn::{ProjectRole, TenantRole};
use apiguard_storage::BoxError;
use async_trait::async_trait;
use moka::future::Cache;

use crate::error::{AuthzError, Result};

/// Effective roles of one user, after inheritance has been resolved.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectsAndTenants {
    /// Role per project id.
    pub projects: BTreeMap<String, ProjectRole>,
    /// Role per tenant id.
    pub tenants: BTreeMap<String, TenantRole>,
}

impl ProjectsAndTenants {
    /// Records `role` on `project`, keeping the higher role if one is
    /// already present.
    #[must_use]
    pub fn with_project(mut self, project: impl Into<String>, role: ProjectRole) -> Self {
        let entry = self.projects.entry(project.into()).or_insert(role);
        *entry = (*entry).max(role);
        self
    }

    /// Records `role` on `tenant`, keeping the higher role if one is already
    /// present.
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>, role: TenantRole) -> Self {
        let entry = self.tenants.entry(tenant.into()).or_insert(role);
        *entry = (*entry).max(role);
        self
    }

    /// Role on `project`, [`ProjectRole::Unspecified`] if none.
    #[must_use]
    pub fn project_role(&self, project: &str) -> ProjectRole {
        self.projects.get(project).copied().unwrap_or(ProjectRole::Unspecified)
    }

    /// Role on `tenant`, [`TenantRole::Unspecified`] if none.
    #[must_use]
    pub fn tenant_role(&self, tenant: &str) -> TenantRole {
        self.tenants.get(tenant).copied().unwrap_or(TenantRole::Unspecified)
    }
}

/// The external membership query.
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// Resolves the effective project and tenant roles of `user_id`.
    async fn projects_and_tenants(
        &self,
        user_id: &str,
    ) -> std::result::Result<ProjectsAndTenants, BoxError>;
}

/// TTL cache over a [`MembershipSource`], keyed by user id.
#[derive(Clone)]
pub struct CachedMembership {
    source: Arc<dyn MembershipSource>,
    cache: Cache<String, Arc<ProjectsAndTenants>>,
}

impl fmt::Debug for CachedMembership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedMembership")
            .field("entries", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

const MAX_CACHED_USERS: u64 = 10_000;

impl CachedMembership {
    /// Creates an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(source: Arc<dyn MembershipSource>, ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).max_capacity(MAX_CACHED_USERS).build();
        Self { source, cache }
    }

    /// Memberships of `user_id`, from cache when fresh.
    ///
    /// # Errors
    ///
    /// [`AuthzError::Membership`] if the source fails. Failures are not
    /// cached.
    pub async fn get(&self, user_id: &str) -> Result<Arc<ProjectsAndTenants>> {
        let source = Arc::clone(&self.source);
        let owned = user_id.to_string();
        self.cache
            .try_get_with(user_id.to_string(), async move {
                source.projects_and_tenants(&owned).await.map(Arc::new)
            })
            .await
            .map_err(|err| AuthzError::Membership {
                message: err.to_string(),
                source: Some(BoxError::clone(&err)),
            })
    }

    /// Discards any cached entry for `user_id` and queries the source.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn force_refresh(&self, user_id: &str) -> Result<Arc<ProjectsAndTenants>> {
        self.cache.invalidate(user_id).await;
        self.get(user_id).await
    }
}
