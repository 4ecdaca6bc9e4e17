//! Signing-certificate lifecycle.
//!
//! The [`CertificateStore`] keeps exactly one "latest" private key and a
//! prefix-scannable set of public certificates in the shared store:
//!
//! ```text
//! certs/private/latest        current signing key + its certificate
//! certs/public/{serial:020}   one record per generated certificate
//! certs/serial                monotonic serial counter
//! ```
//!
//! Every certificate is valid for twice the maximum token lifetime and is
//! replaced once less than the renewal window remains, so a certificate
//! always outlives every token signed with its key. Old public records stay
//! discoverable until their own TTL drops them from the store.
//!
//! Keys are NIST P-521. A certificate binds the public point to its serial
//! and validity window and carries an ES512 signature made with the
//! certified key, which [`CertificateRecord::verifying_key`] checks before
//! the key is trusted for verification.

use std::fmt;

use apiguard_storage::{
    SharedBackend, SharedClock, StorageError,
    clock::{add_duration, remaining},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use fail::fail_point;
use p521::ecdsa::{
    Signature, SigningKey, VerifyingKey,
    signature::{Signer, Verifier},
};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    config::AuthnConfig,
    error::{AuthError, Result},
    jwks::{PublicKeySet, decode_public_key},
    key_cache::KeySetSource,
};

const PRIVATE_KEY: &str = "certs/private/latest";
const PUBLIC_PREFIX: &str = "certs/public/";
const SERIAL_KEY: &str = "certs/serial";

fn public_key_entry(serial: u64) -> String {
    format!("{PUBLIC_PREFIX}{serial:020}")
}

/// A persisted public certificate: a P-521 public key bound to its serial
/// and validity window, self-signed by the matching private key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Monotonic serial; doubles as the `kid` of every credential signed
    /// with the matching private key.
    pub serial: u64,
    /// Uncompressed SEC1 P-521 point, base64url without padding.
    pub public_key: String,
    /// Start of validity.
    pub not_before: DateTime<Utc>,
    /// End of validity.
    pub not_after: DateTime<Utc>,
    /// ES512 signature (`r || s`, base64url) over every field above, made
    /// with the certified key itself.
    pub signature: String,
}

impl CertificateRecord {
    fn signed_content(&self) -> Vec<u8> {
        format!(
            "apiguard-certificate.{}.{}.{}.{}",
            self.serial,
            self.not_before.timestamp(),
            self.not_after.timestamp(),
            self.public_key
        )
        .into_bytes()
    }

    /// Certifies the public half of `key` for `serial` and signs the record
    /// with `key` itself.
    pub(crate) fn self_signed(
        serial: u64,
        key: &SigningKey,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> Result<Self> {
        let mut record = Self {
            serial,
            public_key: encode_public_key(&VerifyingKey::from(key)),
            not_before,
            not_after,
            signature: String::new(),
        };
        let signature: Signature =
            key.try_sign(&record.signed_content()).map_err(certificate_error)?;
        record.signature = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        Ok(record)
    }

    /// Decodes the public key and checks the self-signature.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidPublicKey`] if the key does not parse or did not
    /// sign this record.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        let key = decode_public_key(&self.public_key)?;
        let raw = URL_SAFE_NO_PAD.decode(self.signature.as_bytes()).map_err(|e| {
            AuthError::invalid_public_key(format!("certificate {}: signature: {e}", self.serial))
        })?;
        let signature = Signature::from_slice(&raw).map_err(|e| {
            AuthError::invalid_public_key(format!("certificate {}: signature: {e}", self.serial))
        })?;
        key.verify(&self.signed_content(), &signature).map_err(|_| {
            AuthError::invalid_public_key(format!("certificate {} is not self-signed", self.serial))
        })?;
        Ok(key)
    }
}

#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PrivateRecord {
    #[zeroize(skip)]
    certificate: CertificateRecord,
    /// P-521 secret scalar, big-endian, base64url.
    private_key: String,
}

impl PrivateRecord {
    fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| AuthError::corrupt_record(PRIVATE_KEY, e))
    }

    fn material(&self) -> Result<SigningKeyMaterial> {
        let secret = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(self.private_key.as_bytes())
                .map_err(|e| AuthError::corrupt_record(PRIVATE_KEY, e))?,
        );
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|e| AuthError::corrupt_record(PRIVATE_KEY, e))?;
        if encode_public_key(&VerifyingKey::from(&signing_key)) != self.certificate.public_key {
            return Err(AuthError::corrupt_record(
                PRIVATE_KEY,
                "private key does not match its certificate",
            ));
        }

        Ok(SigningKeyMaterial {
            serial: self.certificate.serial,
            not_before: self.certificate.not_before,
            not_after: self.certificate.not_after,
            signing_key,
        })
    }
}

/// The current private signing key.
///
/// `Debug` never prints key material.
#[derive(Clone)]
pub struct SigningKeyMaterial {
    serial: u64,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    signing_key: SigningKey,
}

impl SigningKeyMaterial {
    /// Certificate serial.
    #[must_use]
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Key id written into credential headers.
    #[must_use]
    pub fn kid(&self) -> String {
        self.serial.to_string()
    }

    /// Start of the certificate's validity.
    #[must_use]
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// End of the certificate's validity.
    #[must_use]
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl fmt::Debug for SigningKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyMaterial")
            .field("serial", &self.serial)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("signing_key", &"[REDACTED]")
            .finish()
    }
}

/// Uncompressed SEC1 encoding, base64url without padding.
pub(crate) fn encode_public_key(key: &VerifyingKey) -> String {
    URL_SAFE_NO_PAD.encode(key.to_encoded_point(false).as_bytes())
}

fn certificate_error(err: impl fmt::Display) -> AuthError {
    AuthError::Certificate(err.to_string())
}

/// Generates a fresh P-521 key pair and its self-signed certificate.
fn generate(
    serial: u64,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
) -> Result<PrivateRecord> {
    fail_point!("certs-generate", |_| Err(AuthError::Certificate(
        "injected key generation failure".into()
    )));

    let signing_key = SigningKey::random(&mut OsRng);
    let certificate = CertificateRecord::self_signed(serial, &signing_key, not_before, not_after)?;

    let mut secret = signing_key.to_bytes();
    let private_key = URL_SAFE_NO_PAD.encode(secret.as_slice());
    secret.as_mut_slice().zeroize();
    Ok(PrivateRecord { certificate, private_key })
}

/// Owns the signing-key lifecycle.
#[derive(Clone)]
pub struct CertificateStore {
    backend: SharedBackend,
    clock: SharedClock,
    config: AuthnConfig,
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateStore")
            .field("renewal_window", &self.config.renewal_window())
            .field("certificate_validity", &self.config.certificate_validity())
            .finish_non_exhaustive()
    }
}

impl CertificateStore {
    /// Creates a store; no key is generated until first use.
    #[must_use]
    pub fn new(backend: SharedBackend, clock: SharedClock, config: AuthnConfig) -> Self {
        Self { backend, clock, config }
    }

    /// Returns the current signing key, generating a new one first if none
    /// exists or the current one has less than the renewal window left.
    ///
    /// When several instances rotate at once exactly one wins; the others
    /// return the winner's key.
    ///
    /// # Errors
    ///
    /// Internal errors only: storage failures, key generation failures, or a
    /// corrupt persisted key. The next call retries rotation from scratch.
    #[tracing::instrument(skip(self))]
    pub async fn latest_private(&self) -> Result<SigningKeyMaterial> {
        // Whole seconds, so certificate and JWT timestamps line up exactly.
        let now = DateTime::from_timestamp(self.clock.now().timestamp(), 0)
            .unwrap_or_else(|| self.clock.now());

        let observed = self.backend.get(PRIVATE_KEY.as_bytes()).await?;
        if let Some(bytes) = &observed {
            let record = PrivateRecord::decode(bytes)?;
            if self.is_fresh(&record, now) {
                return record.material();
            }
            tracing::debug!(
                serial = record.certificate.serial,
                not_after = %record.certificate.not_after,
                "signing key inside renewal window"
            );
        }

        match self.rotate(now, observed.map(|b| b.to_vec())).await {
            Ok(material) => Ok(material),
            Err(AuthError::Storage(StorageError::Conflict)) => {
                tracing::debug!("concurrent rotation won the race; using its key");
                let bytes = self
                    .backend
                    .get(PRIVATE_KEY.as_bytes())
                    .await?
                    .ok_or(AuthError::Storage(StorageError::Conflict))?;
                let record = PrivateRecord::decode(&bytes)?;
                if self.is_fresh(&record, now) {
                    record.material()
                } else {
                    Err(AuthError::Storage(StorageError::Conflict))
                }
            },
            Err(err) => {
                tracing::warn!(error = %err, "signing key rotation failed");
                Err(err)
            },
        }
    }

    /// Every stored public certificate that has not yet expired, with its
    /// JWKS encoding.
    ///
    /// # Errors
    ///
    /// Storage errors, or [`AuthError::CorruptRecord`] if a stored
    /// certificate cannot be decoded.
    #[tracing::instrument(skip(self))]
    pub async fn public_keys(&self) -> Result<PublicKeySet> {
        let now = self.clock.now();
        let mut records = Vec::new();
        for kv in self.backend.get_prefix(PUBLIC_PREFIX.as_bytes()).await? {
            let record: CertificateRecord = serde_json::from_slice(&kv.value)
                .map_err(|e| AuthError::corrupt_record(String::from_utf8_lossy(&kv.key), e))?;
            if record.not_before <= now && now < record.not_after {
                records.push(record);
            }
        }

        tracing::debug!(count = records.len(), "loaded public certificates");
        PublicKeySet::from_records(&records)
    }

    fn is_fresh(&self, record: &PrivateRecord, now: DateTime<Utc>) -> bool {
        remaining(now, record.certificate.not_after) >= self.config.renewal_window()
    }

    async fn rotate(
        &self,
        now: DateTime<Utc>,
        observed: Option<Vec<u8>>,
    ) -> Result<SigningKeyMaterial> {
        let validity = self.config.certificate_validity();
        let not_after = add_duration(now, validity)
            .ok_or_else(|| AuthError::Certificate("certificate validity overflows".into()))?;

        let serial = self.backend.increment(SERIAL_KEY.as_bytes(), None).await?;
        let serial = u64::try_from(serial)
            .map_err(|_| AuthError::corrupt_record(SERIAL_KEY, format!("negative serial {serial}")))?;

        let record = generate(serial, now, not_after)?;
        let private_value = serde_json::to_vec(&record).map_err(StorageError::from)?;
        let public_value =
            serde_json::to_vec(&record.certificate).map_err(StorageError::from)?;

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(PRIVATE_KEY.into(), observed, private_value, Some(validity));
        txn.set_with_ttl(public_key_entry(serial).into_bytes(), public_value, validity);
        txn.commit().await?;

        tracing::info!(
            audit.action = "signing_key_rotated",
            audit.serial = serial,
            audit.not_before = %now,
            audit.not_after = %not_after,
            "audit_event"
        );

        record.material()
    }
}

#[async_trait]
impl KeySetSource for CertificateStore {
    async fn load(&self) -> Result<PublicKeySet> {
        self.public_keys().await
    }
}
