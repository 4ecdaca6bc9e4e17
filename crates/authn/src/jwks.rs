//! Public verification keys and their JSON Web Key Set export.
//!
//! A [`PublicKeySet`] is built from the currently valid signing certificates.
//! It holds ready-to-use P-521 [`VerifyingKey`]s for local verification plus
//! the same keys as an RFC 7517 key set ([`Jwks`]) of `EC` / `P-521` /
//! `ES512` entries for third-party verifiers. Private material never
//! crosses this module.

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use p521::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::{certs::CertificateRecord, error::AuthError, jws::ALGORITHM};

/// Length of an uncompressed SEC1 P-521 point: tag byte plus two
/// coordinates.
const SEC1_UNCOMPRESSED_LEN: usize = 1 + 2 * 66;

/// Intended use of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUse {
    /// Signature verification.
    Sig,
}

/// One P-521 public key in JWK form (RFC 7518 section 6.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `EC`.
    pub kty: String,
    /// Curve, always `P-521`.
    pub crv: String,
    /// Key id: the certificate serial.
    pub kid: String,
    /// Algorithm, always `ES512`.
    pub alg: String,
    /// Key use, always `sig`.
    #[serde(rename = "use")]
    pub use_field: KeyUse,
    /// Affine x coordinate, 66 bytes, base64url (unpadded).
    pub x: String,
    /// Affine y coordinate, 66 bytes, base64url (unpadded).
    pub y: String,
}

impl Jwk {
    fn from_key(kid: String, key: &VerifyingKey) -> Result<Self, AuthError> {
        let point = key.to_encoded_point(false);
        let (Some(x), Some(y)) = (point.x(), point.y()) else {
            return Err(AuthError::invalid_public_key("point at infinity"));
        };
        Ok(Self {
            kty: "EC".to_string(),
            crv: "P-521".to_string(),
            kid,
            alg: ALGORITHM.to_string(),
            use_field: KeyUse::Sig,
            x: URL_SAFE_NO_PAD.encode(x.as_slice()),
            y: URL_SAFE_NO_PAD.encode(y.as_slice()),
        })
    }
}

/// A JSON Web Key Set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys, ordered by serial.
    pub keys: Vec<Jwk>,
}

/// A verifying key together with the certificate it came from.
#[derive(Clone)]
pub struct VerificationKey {
    kid: String,
    not_after: DateTime<Utc>,
    verifying_key: VerifyingKey,
}

impl VerificationKey {
    /// The key id credentials reference in their `kid` header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// When the backing certificate expires.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// The P-521 public key.
    #[must_use]
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Every currently valid verification key.
#[derive(Clone, Debug, Default)]
pub struct PublicKeySet {
    keys: Vec<VerificationKey>,
    jwks: Jwks,
    raw: Bytes,
}

impl PublicKeySet {
    /// Builds the set from certificate records, which must already be
    /// filtered to the valid ones.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidPublicKey`] if any record's key does not parse or
    /// the record is not signed by its own key.
    pub fn from_records(records: &[CertificateRecord]) -> Result<Self, AuthError> {
        let mut keys = Vec::with_capacity(records.len());
        let mut jwks = Jwks::default();

        for record in records {
            let kid = record.serial.to_string();
            let verifying_key = record.verifying_key()?;
            jwks.keys.push(Jwk::from_key(kid.clone(), &verifying_key)?);
            keys.push(VerificationKey { kid, not_after: record.not_after, verifying_key });
        }

        let raw = Bytes::from(serde_json::to_vec(&jwks).map_err(|e| {
            AuthError::invalid_public_key(format!("failed to encode key set: {e}"))
        })?);

        Ok(Self { keys, jwks, raw })
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no key is currently valid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The keys, ordered by serial.
    #[must_use]
    pub fn keys(&self) -> &[VerificationKey] {
        &self.keys
    }

    /// Looks up a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&VerificationKey> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    /// The key set in JWK form.
    #[must_use]
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    /// The JWKS document as served to third parties.
    #[must_use]
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }
}

/// Decodes a base64url (unpadded) uncompressed SEC1 P-521 point.
///
/// The bytes are checked to be a valid curve point before use.
pub(crate) fn decode_public_key(public_key: &str) -> Result<VerifyingKey, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(public_key.as_bytes())
        .map_err(|e| AuthError::invalid_public_key(format!("base64 decode: {e}")))?;

    if bytes.len() != SEC1_UNCOMPRESSED_LEN {
        return Err(AuthError::invalid_public_key(format!(
            "expected {SEC1_UNCOMPRESSED_LEN} bytes, got {}",
            bytes.len()
        )));
    }

    VerifyingKey::from_sec1_bytes(&bytes)
        .map_err(|e| AuthError::invalid_public_key(format!("invalid P-521 point: {e}")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use p521::ecdsa::SigningKey;
    use rand_core::OsRng;
    use rstest::rstest;

    use super::*;
    use crate::certs::encode_public_key;

    fn record(serial: u64) -> (CertificateRecord, VerifyingKey) {
        let signing_key = SigningKey::random(&mut OsRng);
        let verifying_key = VerifyingKey::from(&signing_key);
        let record = CertificateRecord::self_signed(
            serial,
            &signing_key,
            DateTime::from_timestamp(0, 0).unwrap(),
            DateTime::from_timestamp(100, 0).unwrap(),
        )
        .unwrap();
        (record, verifying_key)
    }

    #[test]
    fn test_jwks_shape() {
        let (first, key) = record(3);
        let records = [first, record(4).0];
        let set = PublicKeySet::from_records(&records).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.find("3").is_some());
        assert!(set.find("5").is_none());

        let json: serde_json::Value = serde_json::from_slice(set.raw()).unwrap();
        let jwk = &json["keys"][0];
        assert_eq!(jwk["kty"], "EC");
        assert_eq!(jwk["crv"], "P-521");
        assert_eq!(jwk["alg"], "ES512");
        assert_eq!(jwk["use"], "sig");
        assert_eq!(jwk["kid"], "3");
        assert!(jwk.get("d").is_none(), "private component must never be exported");

        // x and y are the affine coordinates of the certified point.
        let point = key.to_encoded_point(false);
        let x = URL_SAFE_NO_PAD.decode(jwk["x"].as_str().unwrap()).unwrap();
        let y = URL_SAFE_NO_PAD.decode(jwk["y"].as_str().unwrap()).unwrap();
        assert_eq!(x.len(), 66);
        assert_eq!(x.as_slice(), point.x().unwrap().as_slice());
        assert_eq!(y.as_slice(), point.y().unwrap().as_slice());
    }

    #[test]
    fn test_empty_set() {
        let set = PublicKeySet::from_records(&[]).unwrap();
        assert!(set.is_empty());
        assert_eq!(&set.raw()[..], br#"{"keys":[]}"#);
    }

    #[test]
    fn test_record_signed_by_other_key_rejected() {
        let (mut forged, _) = record(3);
        forged.public_key = encode_public_key(&VerifyingKey::from(&SigningKey::random(&mut OsRng)));

        let result = PublicKeySet::from_records(&[forged]);
        assert!(matches!(result, Err(AuthError::InvalidPublicKey(_))));
    }

    #[rstest]
    #[case::invalid_base64("not-valid!!!")]
    #[case::wrong_length("AAAA")]
    #[case::not_on_curve(&URL_SAFE_NO_PAD.encode([4u8; SEC1_UNCOMPRESSED_LEN]))]
    fn test_decode_public_key_invalid(#[case] bad_key: &str) {
        let result = decode_public_key(bad_key);
        assert!(matches!(result, Err(AuthError::InvalidPublicKey(_))));
    }
}
