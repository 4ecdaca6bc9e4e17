//! Configuration for token issuance and validation.
//!
//! [`AuthnConfig`] deserializes from the service configuration file
//! (durations in humantime form, e.g. `"36h"`) or is built in code through
//! its validating builder.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use apiguard_authn::AuthnConfig;
//!
//! let config = AuthnConfig::builder()
//!     .issuer("https://api.example.com")
//!     .allowed_issuers(vec!["https://legacy.example.com".into()])
//!     .max_token_lifetime(Duration::from_secs(3600))
//!     .renewal_window(Duration::from_secs(5400))
//!     .build()?;
//!
//! assert_eq!(config.certificate_validity(), Duration::from_secs(7200));
//! # Ok::<(), apiguard_storage::ConfigError>(())
//! ```

use std::time::Duration;

use apiguard_storage::ConfigError;
use serde::{Deserialize, Serialize};

/// Default maximum token lifetime (24 hours).
pub const DEFAULT_MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 3600);

/// Default certificate renewal window (36 hours).
pub const DEFAULT_RENEWAL_WINDOW: Duration = Duration::from_secs(36 * 3600);

/// Default verification-key cache TTL (1 hour).
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Default minimum spacing between forced key refreshes (5 seconds).
pub const DEFAULT_KEY_REFRESH_COOLDOWN: Duration = Duration::from_secs(5);

/// Issuance and validation settings.
///
/// # Invariants
///
/// `max_token_lifetime <= renewal_window < 2 * max_token_lifetime`.
///
/// Certificates are valid for twice the maximum token lifetime and are only
/// used for signing while more than `renewal_window` of validity remains, so
/// every token signed under a certificate expires before it does. The upper
/// bound keeps a freshly generated certificate from being immediately due
/// for renewal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthnConfig {
    /// Issuer written into every credential this instance mints.
    pub(crate) issuer: String,

    /// Additional issuers whose credentials are accepted.
    #[serde(default)]
    pub(crate) allowed_issuers: Vec<String>,

    /// Longest lifetime a credential may be issued with.
    #[serde(with = "humantime_serde", default = "default_max_token_lifetime")]
    pub(crate) max_token_lifetime: Duration,

    /// Remaining certificate validity below which a new key is generated.
    #[serde(with = "humantime_serde", default = "default_renewal_window")]
    pub(crate) renewal_window: Duration,

    /// How long a loaded verification key set is served from memory.
    #[serde(with = "humantime_serde", default = "default_key_cache_ttl")]
    pub(crate) key_cache_ttl: Duration,

    /// Minimum spacing between refreshes forced by an unknown key id.
    #[serde(with = "humantime_serde", default = "default_key_refresh_cooldown")]
    pub(crate) key_refresh_cooldown: Duration,
}

fn default_max_token_lifetime() -> Duration {
    DEFAULT_MAX_TOKEN_LIFETIME
}

fn default_renewal_window() -> Duration {
    DEFAULT_RENEWAL_WINDOW
}

fn default_key_cache_ttl() -> Duration {
    DEFAULT_KEY_CACHE_TTL
}

fn default_key_refresh_cooldown() -> Duration {
    DEFAULT_KEY_REFRESH_COOLDOWN
}

#[bon::bon]
impl AuthnConfig {
    /// Creates a new configuration, validating every field.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the issuer is empty, the maximum lifetime or
    /// cache TTL is zero, or the renewal window violates the invariant above.
    #[builder]
    pub fn new(
        #[builder(into)] issuer: String,
        #[builder(default)] allowed_issuers: Vec<String>,
        #[builder(default = DEFAULT_MAX_TOKEN_LIFETIME)] max_token_lifetime: Duration,
        #[builder(default = DEFAULT_RENEWAL_WINDOW)] renewal_window: Duration,
        #[builder(default = DEFAULT_KEY_CACHE_TTL)] key_cache_ttl: Duration,
        #[builder(default = DEFAULT_KEY_REFRESH_COOLDOWN)] key_refresh_cooldown: Duration,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            issuer,
            allowed_issuers,
            max_token_lifetime,
            renewal_window,
            key_cache_ttl,
            key_refresh_cooldown,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants. Call after deserializing.
    ///
    /// # Errors
    ///
    /// See [`AuthnConfig::new`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Empty { field: "issuer" });
        }
        if self.max_token_lifetime.is_zero() {
            return Err(ConfigError::MustBePositive {
                field: "max_token_lifetime",
                value: "0s".into(),
            });
        }
        if self.key_cache_ttl.is_zero() {
            return Err(ConfigError::MustBePositive { field: "key_cache_ttl", value: "0s".into() });
        }

        let max = self.max_token_lifetime;
        if self.renewal_window < max || self.renewal_window >= self.certificate_validity() {
            return Err(ConfigError::OutOfRange {
                field: "renewal_window",
                allowed: format!(
                    "[{}, {})",
                    humantime_serde::re::humantime::format_duration(max),
                    humantime_serde::re::humantime::format_duration(self.certificate_validity())
                ),
                value: humantime_serde::re::humantime::format_duration(self.renewal_window)
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Issuer written into minted credentials.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Every accepted issuer, this instance's own first.
    #[must_use]
    pub fn accepted_issuers(&self) -> Vec<String> {
        let mut issuers = vec![self.issuer.clone()];
        issuers.extend(self.allowed_issuers.iter().filter(|i| **i != self.issuer).cloned());
        issuers
    }

    /// Longest permitted credential lifetime.
    #[must_use]
    pub fn max_token_lifetime(&self) -> Duration {
        self.max_token_lifetime
    }

    /// Certificate renewal window.
    #[must_use]
    pub fn renewal_window(&self) -> Duration {
        self.renewal_window
    }

    /// Verification-key cache TTL.
    #[must_use]
    pub fn key_cache_ttl(&self) -> Duration {
        self.key_cache_ttl
    }

    /// Minimum spacing between forced key refreshes.
    #[must_use]
    pub fn key_refresh_cooldown(&self) -> Duration {
        self.key_refresh_cooldown
    }

    /// Validity of every generated signing certificate: twice the maximum
    /// token lifetime.
    #[must_use]
    pub fn certificate_validity(&self) -> Duration {
        self.max_token_lifetime.saturating_mul(2)
    }
}
