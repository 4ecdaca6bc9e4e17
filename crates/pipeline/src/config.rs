//! Pipeline configuration.
//!
//! [`GuardConfig`] is the single section a server reads from its
//! configuration file:
//!
//! ```json
//! {
//!   "authn": { "issuer": "https://api.example.com", "max_token_lifetime": "24h" },
//!   "authz": { "admin_subjects": ["root@github"], "admin_tenant": "t-operations" },
//!   "rate_limit": { "authenticated_per_minute": 100, "unauthenticated_per_minute": 20 }
//! }
//! ```

use std::time::Duration;

use apiguard_authn::AuthnConfig;
use apiguard_authz::AuthzConfig;
use apiguard_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default quota per token and minute.
pub const DEFAULT_AUTHENTICATED_PER_MINUTE: u32 = 100;

/// Default quota per client address and minute.
pub const DEFAULT_UNAUTHENTICATED_PER_MINUTE: u32 = 20;

/// Default lifetime of a per-minute counter.
pub const DEFAULT_COUNTER_TTL: Duration = Duration::from_secs(120);

const MIN_COUNTER_TTL: Duration = Duration::from_secs(60);
const MAX_COUNTER_TTL: Duration = Duration::from_secs(3600);

/// Request quotas.
///
/// # Invariants
///
/// Counters must outlive their minute (so a skewed clock on another instance
/// still counts into the same key) but must not linger: `1m < counter_ttl < 1h`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Calls allowed per token and minute.
    #[serde(default = "default_authenticated_per_minute")]
    pub(crate) authenticated_per_minute: u32,

    /// Calls allowed per client address and minute without a token.
    #[serde(default = "default_unauthenticated_per_minute")]
    pub(crate) unauthenticated_per_minute: u32,

    /// Lifetime of a per-minute counter.
    #[serde(with = "humantime_serde", default = "default_counter_ttl")]
    pub(crate) counter_ttl: Duration,
}

fn default_authenticated_per_minute() -> u32 {
    DEFAULT_AUTHENTICATED_PER_MINUTE
}

fn default_unauthenticated_per_minute() -> u32 {
    DEFAULT_UNAUTHENTICATED_PER_MINUTE
}

fn default_counter_ttl() -> Duration {
    DEFAULT_COUNTER_TTL
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            authenticated_per_minute: DEFAULT_AUTHENTICATED_PER_MINUTE,
            unauthenticated_per_minute: DEFAULT_UNAUTHENTICATED_PER_MINUTE,
            counter_ttl: DEFAULT_COUNTER_TTL,
        }
    }
}

#[bon::bon]
impl RateLimitConfig {
    /// Creates a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a quota is zero or the counter TTL is out
    /// of range.
    #[builder]
    pub fn new(
        #[builder(default = DEFAULT_AUTHENTICATED_PER_MINUTE)] authenticated_per_minute: u32,
        #[builder(default = DEFAULT_UNAUTHENTICATED_PER_MINUTE)] unauthenticated_per_minute: u32,
        #[builder(default = DEFAULT_COUNTER_TTL)] counter_ttl: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self { authenticated_per_minute, unauthenticated_per_minute, counter_ttl };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants. Call after deserializing.
    ///
    /// # Errors
    ///
    /// See [`RateLimitConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("authenticated_per_minute", self.authenticated_per_minute),
            ("unauthenticated_per_minute", self.unauthenticated_per_minute),
        ] {
            if value == 0 {
                return Err(ConfigError::MustBePositive { field, value: "0".into() });
            }
        }
        if self.counter_ttl <= MIN_COUNTER_TTL || self.counter_ttl >= MAX_COUNTER_TTL {
            return Err(ConfigError::OutOfRange {
                field: "counter_ttl",
                allowed: "(1m, 1h)".into(),
                value: format!("{:?}", self.counter_ttl),
            });
        }
        Ok(())
    }

    /// Calls allowed per token and minute.
    #[must_use]
    pub fn authenticated_per_minute(&self) -> u32 {
        self.authenticated_per_minute
    }

    /// Calls allowed per client address and minute.
    #[must_use]
    pub fn unauthenticated_per_minute(&self) -> u32 {
        self.unauthenticated_per_minute
    }

    /// Lifetime of a per-minute counter.
    #[must_use]
    pub fn counter_ttl(&self) -> Duration {
        self.counter_ttl
    }
}

/// Everything the guard needs, as one configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Issuance and validation.
    pub authn: AuthnConfig,
    /// Admin entitlement and membership caching.
    #[serde(default)]
    pub authz: AuthzConfig,
    /// Request quotas.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl GuardConfig {
    /// Combines already validated sections.
    #[must_use]
    pub fn new(authn: AuthnConfig, authz: AuthzConfig, rate_limit: RateLimitConfig) -> Self {
        Self { authn, authz, rate_limit }
    }

    /// Validates every section. Call after deserializing.
    ///
    /// # Errors
    ///
    /// The first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.authn.validate()?;
        self.authz.validate()?;
        self.rate_limit.validate()
    }
}
