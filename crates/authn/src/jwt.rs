//! Credential issuance and validation.
//!
//! The wire credential is a compact ES512-signed JWT that identifies a
//! [`Token`] record and nothing more:
//!
//! ```json
//! {
//!   "iss": "https://api.example.com",
//!   "sub": "alice@github",
//!   "iat": 1700000000,
//!   "nbf": 1700000000,
//!   "exp": 1700003600,
//!   "jti": "5f0c6d0e-8c1a-4a57-9d0c-2f1f2b0c9b1e",
//!   "type": "api"
//! }
//! ```
//!
//! Permissions are never carried in the credential. They are read from the
//! [`TokenStore`] on every validation, which is what makes revocation and
//! live permission edits effective immediately.

use std::{fmt, time::Duration};

use apiguard_storage::{
    SharedClock,
    clock::{add_duration, remaining},
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    certs::SigningKeyMaterial,
    config::AuthnConfig,
    error::{AuthError, Result},
    jwks::PublicKeySet,
    jws,
    key_cache::VerificationKeyCache,
    token::{Grants, Token, TokenStore, TokenType},
    validation::inspect_header,
};

/// Claims carried by the wire credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Issuer.
    pub iss: String,
    /// Subject: the owning identity.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Not before (seconds since epoch).
    pub nbf: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
    /// Token id; the key of the server-side record.
    pub jti: String,
    /// Kind of credential.
    #[serde(rename = "type")]
    pub token_type: TokenType,
}

/// Mints credentials.
#[derive(Clone)]
pub struct TokenIssuer {
    clock: SharedClock,
    max_lifetime: Duration,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer").field("max_lifetime", &self.max_lifetime).finish()
    }
}

impl TokenIssuer {
    /// Creates an issuer that refuses lifetimes above `max_lifetime`.
    #[must_use]
    pub fn new(clock: SharedClock, max_lifetime: Duration) -> Self {
        Self { clock, max_lifetime }
    }

    /// Longest lifetime this issuer accepts.
    #[must_use]
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Signs a credential valid from now for `duration` and returns it with
    /// a fresh, grant-less [`Token`] record.
    ///
    /// The record is not persisted; callers attach grants and store it.
    ///
    /// # Errors
    ///
    /// - [`AuthError::LifetimeExceeded`] if `duration` is above the maximum
    /// - [`AuthError::Signing`] if signing fails or the credential would
    ///   outlive the certificate of `key`
    pub fn issue(
        &self,
        token_type: TokenType,
        subject: &str,
        issuer: &str,
        duration: Duration,
        key: &SigningKeyMaterial,
    ) -> Result<(String, Token)> {
        if duration > self.max_lifetime {
            return Err(AuthError::LifetimeExceeded {
                requested: duration,
                max: self.max_lifetime,
            });
        }
        if subject.is_empty() {
            return Err(AuthError::missing_claim("sub"));
        }

        let now = self.clock.now();
        let issued_at = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let expires_at = add_duration(issued_at, duration)
            .ok_or_else(|| AuthError::Signing("expiry out of range".into()))?;
        if expires_at > key.not_after() {
            return Err(AuthError::Signing(format!(
                "credential would outlive signing certificate {}",
                key.serial()
            )));
        }

        let uuid = Uuid::new_v4();
        let claims = Claims {
            iss: issuer.to_string(),
            sub: subject.to_string(),
            iat: issued_at.timestamp(),
            nbf: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            jti: uuid.to_string(),
            token_type,
        };

        let credential = jws::sign(&claims, &key.kid(), key.signing_key())?;

        tracing::debug!(
            user_id = subject,
            token_id = %uuid,
            kid = key.serial(),
            expires_at = %expires_at,
            "credential issued"
        );

        let token = Token {
            uuid,
            user_id: subject.to_string(),
            description: String::new(),
            issued_at,
            expires_at,
            token_type,
            grants: Grants::default(),
        };
        Ok((credential, token))
    }
}

/// Verifies inbound credentials and resolves them to their [`Token`]
/// record.
pub struct TokenValidator {
    keys: VerificationKeyCache,
    tokens: TokenStore,
    clock: SharedClock,
    accepted_issuers: Vec<String>,
    refresh_cooldown: Duration,
    last_forced_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenValidator")
            .field("accepted_issuers", &self.accepted_issuers)
            .field("refresh_cooldown", &self.refresh_cooldown)
            .finish_non_exhaustive()
    }
}

impl TokenValidator {
    /// Creates a validator accepting the issuers of `config`.
    #[must_use]
    pub fn new(
        keys: VerificationKeyCache,
        tokens: TokenStore,
        clock: SharedClock,
        config: &AuthnConfig,
    ) -> Self {
        Self {
            keys,
            tokens,
            clock,
            accepted_issuers: config.accepted_issuers(),
            refresh_cooldown: config.key_refresh_cooldown(),
            last_forced_refresh: Mutex::new(None),
        }
    }

    /// The key cache this validator reads from.
    #[must_use]
    pub fn key_cache(&self) -> &VerificationKeyCache {
        &self.keys
    }

    /// Verifies `credential` and returns its live [`Token`] record.
    ///
    /// # Errors
    ///
    /// One distinct variant per cause: [`AuthError::InvalidTokenFormat`],
    /// [`AuthError::UnsupportedAlgorithm`], [`AuthError::InvalidSignature`],
    /// [`AuthError::UntrustedIssuer`], [`AuthError::TokenNotYetValid`],
    /// [`AuthError::TokenExpired`], [`AuthError::NoVerificationKeys`], and
    /// [`AuthError::TokenRevoked`] when the signature and claims are fine but
    /// the record is gone. Store failures surface as internal errors.
    #[tracing::instrument(skip_all)]
    pub async fn validate(&self, credential: &str) -> Result<Token> {
        let header = inspect_header(credential)?;

        let mut keys = self.keys.get().await?;
        if keys.is_empty() {
            tracing::debug!("verification key set empty; forcing refresh");
            keys = self.keys.force_refresh().await?;
            if keys.is_empty() {
                return Err(AuthError::NoVerificationKeys);
            }
        }

        if let Some(kid) = header.kid.as_deref() {
            if keys.find(kid).is_none() && self.claim_forced_refresh() {
                tracing::debug!(kid, "unknown key id; forcing refresh");
                keys = self.keys.force_refresh().await?;
            }
        }

        let claims = match verify_signature(credential, &keys, header.kid.as_deref()) {
            Err(AuthError::InvalidSignature)
                if header.kid.as_deref().and_then(|kid| keys.find(kid)).is_none() =>
            {
                return Err(self.unmatched_key_error(credential));
            },
            result => result?,
        };
        self.check_claims(&claims)?;

        let id = Uuid::parse_str(&claims.jti)
            .map_err(|e| AuthError::invalid_token_format(format!("jti is not a UUID: {e}")))?;

        match self.tokens.get(&claims.sub, id).await? {
            Some(token) => {
                tracing::debug!(user_id = %claims.sub, token_id = %id, "credential validated");
                Ok(token)
            },
            None => Err(AuthError::TokenRevoked),
        }
    }

    fn check_claims(&self, claims: &Claims) -> Result<()> {
        if claims.sub.is_empty() {
            return Err(AuthError::missing_claim("sub"));
        }
        if !self.accepted_issuers.iter().any(|issuer| *issuer == claims.iss) {
            return Err(AuthError::UntrustedIssuer(claims.iss.clone()));
        }

        let now = self.clock.now().timestamp();
        if now < claims.nbf {
            return Err(AuthError::TokenNotYetValid);
        }
        if now >= claims.exp {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }

    /// The error for a credential no published key verifies.
    ///
    /// Certificates outlive every credential they sign, so a key that has
    /// left the set only ever leaves expired credentials behind. Those are
    /// reported as expired; everything else as a bad signature.
    fn unmatched_key_error(&self, credential: &str) -> AuthError {
        #[derive(Deserialize)]
        struct Expiry {
            exp: i64,
        }

        match jws::decode_claims::<Expiry>(credential) {
            Ok(Expiry { exp }) if self.clock.now().timestamp() >= exp => AuthError::TokenExpired,
            _ => AuthError::InvalidSignature,
        }
    }

    /// Returns `true` at most once per cooldown period.
    fn claim_forced_refresh(&self) -> bool {
        let now = self.clock.now();
        let mut last = self.last_forced_refresh.lock();
        match *last {
            Some(at) if remaining(at, now) < self.refresh_cooldown => false,
            _ => {
                *last = Some(now);
                true
            },
        }
    }
}

/// Verifies the signature against the key named by `kid`, or against every
/// key when the id is absent or unknown.
fn verify_signature(credential: &str, keys: &PublicKeySet, kid: Option<&str>) -> Result<Claims> {
    let candidates: Vec<_> = match kid.and_then(|kid| keys.find(kid)) {
        Some(key) => vec![key],
        None => keys.keys().iter().collect(),
    };

    for key in candidates {
        match jws::verify(credential, key.verifying_key()) {
            Ok(()) => return jws::decode_claims(credential),
            Err(AuthError::InvalidSignature) => continue,
            Err(err) => return Err(err),
        }
    }

    Err(AuthError::InvalidSignature)
}
