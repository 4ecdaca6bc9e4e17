//! ES512 compact serialization.
//!
//! ```text
//! base64url(header) "." base64url(claims) "." base64url(r || s)
//! ```
//!
//! The signature is ECDSA over P-521 with SHA-512, in the fixed-width
//! `r || s` form (132 bytes) that RFC 7518 prescribes for JWS. Nonces are
//! derived per RFC 6979, so signing is deterministic.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use p521::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AuthError, Result};

/// The only signature algorithm credentials are issued and accepted with.
pub const ALGORITHM: &str = "ES512";

#[derive(Serialize)]
struct Header<'a> {
    alg: &'a str,
    typ: &'a str,
    kid: &'a str,
}

/// The three segments of a compact credential.
struct Segments<'a> {
    signing_input: &'a str,
    payload: &'a str,
    signature: &'a str,
}

impl<'a> Segments<'a> {
    fn split(credential: &'a str) -> Result<Self> {
        let malformed = || AuthError::invalid_token_format("JWT must have 3 parts separated by dots");
        let (signing_input, signature) = credential.rsplit_once('.').ok_or_else(malformed)?;
        let (_, payload) = signing_input.split_once('.').ok_or_else(malformed)?;
        if payload.contains('.') {
            return Err(malformed());
        }
        Ok(Self { signing_input, payload, signature })
    }
}

/// Signs `claims` under `kid`.
///
/// # Errors
///
/// [`AuthError::Signing`] if the claims do not serialize or signing fails.
pub fn sign<T: Serialize>(claims: &T, kid: &str, key: &SigningKey) -> Result<String> {
    let header = serde_json::to_vec(&Header { alg: ALGORITHM, typ: "JWT", kid })
        .map_err(|e| AuthError::Signing(e.to_string()))?;
    let payload = serde_json::to_vec(claims).map_err(|e| AuthError::Signing(e.to_string()))?;

    let signing_input =
        format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(payload));
    let signature: Signature = key
        .try_sign(signing_input.as_bytes())
        .map_err(|e| AuthError::Signing(e.to_string()))?;

    Ok(format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes())))
}

/// Checks the signature of `credential` against `key`.
///
/// # Errors
///
/// [`AuthError::InvalidTokenFormat`] if the credential is not three
/// segments or the signature is not base64url, and
/// [`AuthError::InvalidSignature`] if it was not produced by `key`.
pub fn verify(credential: &str, key: &VerifyingKey) -> Result<()> {
    let segments = Segments::split(credential)?;
    let raw = URL_SAFE_NO_PAD.decode(segments.signature).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT signature: {e}"))
    })?;
    let signature = Signature::from_slice(&raw).map_err(|_| AuthError::InvalidSignature)?;

    key.verify(segments.signing_input.as_bytes(), &signature)
        .map_err(|_| AuthError::InvalidSignature)
}

/// Decodes the claims segment without checking the signature.
///
/// Only call this after [`verify`] succeeded, or to choose between two
/// rejections.
///
/// # Errors
///
/// [`AuthError::InvalidTokenFormat`] if the segment is not base64url JSON of
/// the expected shape.
pub fn decode_claims<T: DeserializeOwned>(credential: &str) -> Result<T> {
    let segments = Segments::split(credential)?;
    let bytes = URL_SAFE_NO_PAD.decode(segments.payload).map_err(|e| {
        AuthError::invalid_token_format(format!("Failed to decode JWT claims: {e}"))
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::invalid_token_format(format!("Failed to parse JWT claims: {e}")))
}
