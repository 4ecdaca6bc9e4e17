//! Credential header checks performed before any key lookup.
//!
//! The header is parsed by hand rather than through the JWT library so that
//! `alg: "none"` and symmetric algorithms are reported as what they are
//! instead of as a generic parse failure.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::{error::AuthError, jws::ALGORITHM};

/// Algorithms that are never accepted.
///
/// `none` carries no signature at all; the HMAC family would let anyone
/// holding a published public key forge credentials.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Algorithms credentials may be signed with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &[ALGORITHM];

/// The unverified credential header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnverifiedHeader {
    /// Signature algorithm.
    pub alg: String,
    /// Key id, when present.
    #[serde(default)]
    pub kid: Option<String>,
}

/// Checks `alg` against [`FORBIDDEN_ALGORITHMS`] and [`ACCEPTED_ALGORITHMS`].
///
/// # Errors
///
/// [`AuthError::UnsupportedAlgorithm`] for any algorithm other than ES512.
///
/// # Examples
///
/// ```
/// use apiguard_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("ES512").is_ok());
/// assert!(validate_algorithm("EdDSA").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.iter().any(|forbidden| forbidden.eq_ignore_ascii_case(alg)) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not allowed for security reasons"
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{alg}' is not in accepted list (only {ALGORITHM} is supported)"
        )));
    }

    Ok(())
}

/// Decodes the header of a compact credential and checks its algorithm.
///
/// # Errors
///
/// [`AuthError::InvalidTokenFormat`] if the credential is not three
/// dot-separated segments or the header is not valid base64url JSON, and
/// [`AuthError::UnsupportedAlgorithm`] from [`validate_algorithm`].
pub fn inspect_header(credential: &str) -> Result<UnverifiedHeader, AuthError> {
    let mut parts = credential.split('.');
    let (Some(header), Some(_), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::invalid_token_format("JWT must have 3 parts separated by dots"));
    };

    let bytes = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT header: {e}"))
    })?;
    let header: UnverifiedHeader = serde_json::from_slice(&bytes).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to parse JWT header: {e}"))
    })?;

    validate_algorithm(&header.alg)?;
    Ok(header)
}
