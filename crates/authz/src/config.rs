//! Authorization settings.

use std::time::Duration;

use apiguard_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default membership cache TTL (one minute).
pub const DEFAULT_MEMBERSHIP_CACHE_TTL: Duration = Duration::from_secs(60);

/// Who may hold admin tokens, and how long membership lookups are reused.
///
/// # Example
///
/// ```
/// use apiguard_authz::AuthzConfig;
///
/// let config = AuthzConfig::builder()
///     .admin_subjects(vec!["root@github".into()])
///     .admin_tenant("t-operations")
///     .build()?;
/// assert!(config.is_admin_subject("root@github"));
/// # Ok::<(), apiguard_storage::ConfigError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthzConfig {
    /// Logins allowed to request an admin role.
    #[serde(default)]
    pub(crate) admin_subjects: Vec<String>,

    /// Tenant in which admin-capable logins must hold at least editor.
    #[serde(default)]
    pub(crate) admin_tenant: Option<String>,

    /// How long a membership lookup is reused for non-critical reads.
    #[serde(with = "humantime_serde", default = "default_membership_cache_ttl")]
    pub(crate) membership_cache_ttl: Duration,
}

fn default_membership_cache_ttl() -> Duration {
    DEFAULT_MEMBERSHIP_CACHE_TTL
}

impl Default for AuthzConfig {
    fn default() -> Self {
        Self {
            admin_subjects: Vec::new(),
            admin_tenant: None,
            membership_cache_ttl: DEFAULT_MEMBERSHIP_CACHE_TTL,
        }
    }
}

#[bon::bon]
impl AuthzConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the cache TTL is zero or admin subjects
    /// are listed without an admin tenant.
    #[builder]
    pub fn new(
        #[builder(default)] admin_subjects: Vec<String>,
        #[builder(into)] admin_tenant: Option<String>,
        #[builder(default = DEFAULT_MEMBERSHIP_CACHE_TTL)] membership_cache_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { admin_subjects, admin_tenant, membership_cache_ttl };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants. Call after deserializing.
    ///
    /// # Errors
    ///
    /// See [`AuthzConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.membership_cache_ttl.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "membership_cache_ttl",
                value: "0s".into(),
            });
        }
        if !self.admin_subjects.is_empty()
            && self.admin_tenant.as_deref().is_none_or(str::is_empty)
        {
            return Err(ConfigError::Empty { field: "admin_tenant" });
        }
        Ok(())
    }

    /// Whether `user_id` is on the admin allow-list.
    #[must_use]
    pub fn is_admin_subject(&self, user_id: &str) -> bool {
        self.admin_subjects.iter().any(|subject| subject == user_id)
    }

    /// The tenant that backs admin elevation, if configured.
    #[must_use]
    pub fn admin_tenant(&self) -> Option<&str> {
        self.admin_tenant.as_deref()
    }

    /// Membership cache TTL.
    #[must_use]
    pub fn membership_cache_ttl(&self) -> Duration {
        self.membership_cache_ttl
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthzConfig::builder().build().unwrap();
        assert_eq!(config.membership_cache_ttl(), Duration::from_secs(60));
        assert!(!config.is_admin_subject("anyone"));
        assert_eq!(config.admin_tenant(), None);
        AuthzConfig::default().validate().unwrap();
    }

    #[test]
    fn test_admin_subjects_need_tenant() {
        let err = AuthzConfig::builder().admin_subjects(vec!["root".into()]).build().unwrap_err();
        assert_eq!(err, ConfigError::Empty { field: "admin_tenant" });
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = AuthzConfig::builder().membership_cache_ttl(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive { field: "membership_cache_ttl", .. }));
    }

    #[test]
    fn test_deserialize() {
        let config: AuthzConfig = serde_json::from_str(
            r#"{"admin_subjects":["root"],"admin_tenant":"ops","membership_cache_ttl":"30s"}"#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.membership_cache_ttl(), Duration::from_secs(30));
        assert!(config.is_admin_subject("root"));

        let unknown = serde_json::from_str::<AuthzConfig>(r#"{"admins":[]}"#);
        assert!(unknown.is_err());
    }
}
