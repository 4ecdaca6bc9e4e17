//! Shared test utilities for authentication testing.
//!
//! Key generation, hand-crafted credentials for attack tests, and an
//! [`AuthnHarness`] wiring a certificate store, token store, issuer and
//! validator over one in-memory backend with a manual clock. Feature-gated
//! behind `testutil` so none of it reaches production builds.
//!
//! ```toml
//! [dev-dependencies]
//! apiguard-authn = { workspace = true, features = ["testutil"] }
//! ```

use std::{sync::Arc, time::Duration};

use apiguard_storage::{
    Clock, ManualClock, MemoryBackend, SharedBackend,
    testutil::{TEST_EPOCH, manual_backend},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p521::ecdsa::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use serde_json::json;

use crate::{
    certs::{CertificateStore, encode_public_key},
    config::AuthnConfig,
    jws,
    jwt::{TokenIssuer, TokenValidator},
    key_cache::{KeySetSource, VerificationKeyCache},
    token::{Grants, Token, TokenStore, TokenType},
};

/// Issuer every harness is configured with.
pub const TEST_ISSUER: &str = "https://apiguard.test";

/// Generates a P-521 key pair unrelated to any certificate store.
///
/// Returns the signing key and its public point in the stored encoding.
pub fn generate_test_keypair() -> (SigningKey, String) {
    let signing_key = SigningKey::random(&mut OsRng);
    let public_key = encode_public_key(&VerifyingKey::from(&signing_key));
    (signing_key, public_key)
}

/// Signs arbitrary `claims` with `key` under `kid` as an ES512 credential.
///
/// # Panics
///
/// Panics if signing fails.
pub fn sign_claims(key: &SigningKey, kid: &str, claims: &serde_json::Value) -> String {
    jws::sign(claims, kid, key).expect("Failed to sign test JWT")
}

/// Well-formed claims for `subject`, valid for an hour from [`TEST_EPOCH`].
pub fn valid_claims(subject: &str) -> serde_json::Value {
    json!({
        "iss": TEST_ISSUER,
        "sub": subject,
        "iat": TEST_EPOCH,
        "nbf": TEST_EPOCH,
        "exp": TEST_EPOCH + 3600,
        "jti": uuid::Uuid::new_v4().to_string(),
        "type": "api",
    })
}

/// A credential with valid claims and `kid` "1", signed by a key no
/// certificate store knows.
pub fn forged_credential(subject: &str) -> String {
    let (key, _) = generate_test_keypair();
    sign_claims(&key, "1", &valid_claims(subject))
}

/// Builds `{header_b64}.{payload_b64}.` with an empty signature, for testing
/// rejection of `alg: "none"` and other malformed credentials.
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Configuration with a one hour maximum lifetime and a 90 minute renewal
/// window.
///
/// # Panics
///
/// Never; the values satisfy every invariant.
pub fn test_config() -> AuthnConfig {
    AuthnConfig::builder()
        .issuer(TEST_ISSUER)
        .max_token_lifetime(Duration::from_secs(3600))
        .renewal_window(Duration::from_secs(5400))
        .build()
        .expect("valid test config")
}

/// Every authentication component over one in-memory backend.
pub struct AuthnHarness {
    /// The shared backend.
    pub backend: Arc<MemoryBackend>,
    /// Drives every TTL and validity check.
    pub clock: Arc<ManualClock>,
    /// Configuration in use.
    pub config: AuthnConfig,
    /// Certificate store.
    pub certs: CertificateStore,
    /// Token store.
    pub tokens: TokenStore,
    /// Issuer.
    pub issuer: TokenIssuer,
    /// Validator.
    pub validator: Arc<TokenValidator>,
}

impl AuthnHarness {
    /// Wires a harness with [`test_config`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Wires a harness with `config`.
    #[must_use]
    pub fn with_config(config: AuthnConfig) -> Self {
        let (backend, clock) = manual_backend();
        let backend = Arc::new(backend);
        let shared: SharedBackend = backend.clone();

        let certs = CertificateStore::new(shared.clone(), clock.clone(), config.clone());
        let tokens = TokenStore::new(shared, clock.clone());
        let source: Arc<dyn KeySetSource> = Arc::new(certs.clone());
        let cache = VerificationKeyCache::new(source, config.key_cache_ttl());
        let validator =
            Arc::new(TokenValidator::new(cache, tokens.clone(), clock.clone(), &config));
        let issuer = TokenIssuer::new(clock.clone(), config.max_token_lifetime());

        Self { backend, clock, config, certs, tokens, issuer, validator }
    }

    /// Issues and stores an API token for `subject` carrying `grants`.
    ///
    /// # Panics
    ///
    /// Panics if any step fails.
    pub async fn mint(&self, subject: &str, grants: Grants, lifetime: Duration) -> (String, Token) {
        let key = self.certs.latest_private().await.expect("signing key");
        let (credential, mut token) = self
            .issuer
            .issue(TokenType::Api, subject, TEST_ISSUER, lifetime, &key)
            .expect("issue");
        token.grants = grants;
        self.tokens.put(&token).await.expect("store token");
        (credential, token)
    }

    /// Current time on the harness clock.
    #[must_use]
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

impl Default for AuthnHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Asserts that a [`Result<T, AuthError>`](crate::AuthError) is an `Err` of
/// the given variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use apiguard_authn::{AuthError, assert_auth_error};
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}
