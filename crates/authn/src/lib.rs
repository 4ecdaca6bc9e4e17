//! # apiguard authentication
//!
//! Signing-key lifecycle, credential issuance and validation, and the
//! server-side token records that back every credential.
//!
//! This crate provides:
//! - **Certificate store**: one rotating P-521 signing key, a sliding set of public certificates,
//!   and their JWKS export
//! - **Verification key cache**: TTL cache with coalesced loads and on-demand refresh
//! - **Issuer / validator**: compact ES512 credentials resolved to their live [`Token`] record
//! - **Token store**: per-subject token records whose deletion revokes immediately
//!
//! ## Example
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use apiguard_authn::{
//!     AuthnConfig, CertificateStore, KeySetSource, TokenIssuer, TokenStore, TokenType,
//!     TokenValidator, VerificationKeyCache,
//! };
//! use apiguard_storage::{MemoryBackend, SharedBackend, SharedClock, SystemClock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AuthnConfig::builder().issuer("https://api.example.com").build()?;
//! let backend: SharedBackend = Arc::new(MemoryBackend::new());
//! let clock: SharedClock = Arc::new(SystemClock);
//!
//! let certs = CertificateStore::new(backend.clone(), clock.clone(), config.clone());
//! let tokens = TokenStore::new(backend, clock.clone());
//! let source: Arc<dyn KeySetSource> = Arc::new(certs.clone());
//! let validator = TokenValidator::new(
//!     VerificationKeyCache::new(source, config.key_cache_ttl()),
//!     tokens.clone(),
//!     clock.clone(),
//!     &config,
//! );
//!
//! let key = certs.latest_private().await?;
//! let issuer = TokenIssuer::new(clock, config.max_token_lifetime());
//! let (credential, token) =
//!     issuer.issue(TokenType::Api, "alice", config.issuer(), Duration::from_secs(3600), &key)?;
//! tokens.put(&token).await?;
//!
//! let validated = validator.validate(&credential).await?;
//! assert_eq!(validated.uuid, token.uuid);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Signing-certificate lifecycle.
pub mod certs;
/// Issuance and validation settings.
pub mod config;
/// Authentication error types.
pub mod error;
/// Public key set and JWKS export.
pub mod jwks;
/// ES512 compact signing and verification.
pub mod jws;
/// Credential issuance and validation.
pub mod jwt;
/// Verification key cache.
pub mod key_cache;
/// Role enumerations.
pub mod roles;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
/// Token records and their store.
pub mod token;
/// Credential header checks.
pub mod validation;

pub use certs::{CertificateRecord, CertificateStore, SigningKeyMaterial};
pub use config::AuthnConfig;
pub use error::{AuthError, Result};
pub use jwks::{Jwk, Jwks, PublicKeySet, VerificationKey};
pub use jwt::{Claims, TokenIssuer, TokenValidator};
pub use key_cache::{KeySetSource, VerificationKeyCache};
pub use roles::{AdminRole, InfraRole, ProjectRole, TenantRole, UnknownRole};
pub use token::{Grants, MethodPermission, Token, TokenStore, TokenType};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
