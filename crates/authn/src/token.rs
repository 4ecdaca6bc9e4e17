//! Server-side token records and their store.
//!
//! The wire credential only identifies a token; everything it grants lives in
//! the [`Token`] record persisted here. Deleting the record revokes the
//! credential immediately, whatever its `exp` says.
//!
//! # Key layout
//!
//! ```text
//! tokens/{base64url(subject)}/{uuid}
//! ```
//!
//! The subject segment is encoded so a prefix scan for one subject can never
//! match another subject that merely starts with the same characters.

use std::{collections::BTreeMap, fmt, time::Duration};

use apiguard_storage::{SharedBackend, SharedClock, StorageError, clock::remaining};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{AuthError, Result},
    roles::{AdminRole, InfraRole, ProjectRole, TenantRole},
};

const TOKEN_PREFIX: &str = "tokens/";

/// Kind of credential.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenType {
    /// Minted by the login flow for an interactive user.
    #[serde(rename = "user-session")]
    UserSession,
    /// Minted on request for programmatic access.
    #[serde(rename = "api")]
    Api,
}

impl TokenType {
    /// The value carried in the `type` claim.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserSession => "user-session",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit permission to call `methods` on `subject` (`"*"` for any).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodPermission {
    /// Project id, tenant id, or `"*"`.
    pub subject: String,
    /// Fully-qualified method names.
    pub methods: Vec<String>,
}

impl MethodPermission {
    /// Creates a permission for `methods` scoped to `subject`.
    pub fn new(
        subject: impl Into<String>,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self { subject: subject.into(), methods: methods.into_iter().map(Into::into).collect() }
    }
}

/// Everything a token grants.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grants {
    /// Explicit method permissions, in the order they were requested.
    #[serde(default)]
    pub permissions: Vec<MethodPermission>,
    /// Role per project id.
    #[serde(default)]
    pub project_roles: BTreeMap<String, ProjectRole>,
    /// Role per tenant id.
    #[serde(default)]
    pub tenant_roles: BTreeMap<String, TenantRole>,
    /// Global admin role, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_role: Option<AdminRole>,
    /// Infrastructure agent role, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infra_role: Option<InfraRole>,
}

impl Grants {
    /// Adds an explicit permission.
    #[must_use]
    pub fn with_permission(mut self, permission: MethodPermission) -> Self {
        self.permissions.push(permission);
        self
    }

    /// Sets the role for `project`.
    #[must_use]
    pub fn with_project_role(mut self, project: impl Into<String>, role: ProjectRole) -> Self {
        self.project_roles.insert(project.into(), role);
        self
    }

    /// Sets the role for `tenant`.
    #[must_use]
    pub fn with_tenant_role(mut self, tenant: impl Into<String>, role: TenantRole) -> Self {
        self.tenant_roles.insert(tenant.into(), role);
        self
    }

    /// Sets the admin role.
    #[must_use]
    pub fn with_admin_role(mut self, role: AdminRole) -> Self {
        self.admin_role = Some(role);
        self
    }

    /// Sets the infra role.
    #[must_use]
    pub fn with_infra_role(mut self, role: InfraRole) -> Self {
        self.infra_role = Some(role);
        self
    }

    /// Whether these grants carry any admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.admin_role.is_some()
    }
}

/// The server-side record behind a credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token id; the credential's `jti`.
    pub uuid: Uuid,
    /// Owning identity; the credential's `sub`.
    pub user_id: String,
    /// Free-form label chosen by the owner.
    #[serde(default)]
    pub description: String,
    /// Issue time; the credential's `iat` and `nbf`.
    pub issued_at: DateTime<Utc>,
    /// Expiry; the credential's `exp` and the record's TTL.
    pub expires_at: DateTime<Utc>,
    /// Kind of credential.
    pub token_type: TokenType,
    /// What the token may do.
    #[serde(flatten)]
    pub grants: Grants,
}

impl Token {
    /// Lifetime the token was issued with.
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        remaining(self.issued_at, self.expires_at)
    }

    /// Whether the token carries any admin role.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.grants.is_admin()
    }
}

/// Persists [`Token`] records with a TTL matching their expiry.
#[derive(Clone)]
pub struct TokenStore {
    backend: SharedBackend,
    clock: SharedClock,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

fn subject_prefix(subject: &str) -> String {
    format!("{TOKEN_PREFIX}{}/", URL_SAFE_NO_PAD.encode(subject))
}

fn token_key(subject: &str, id: Uuid) -> String {
    format!("{}{id}", subject_prefix(subject))
}

fn decode_token(key: &[u8], value: &[u8]) -> Result<Token> {
    serde_json::from_slice(value)
        .map_err(|e| AuthError::corrupt_record(String::from_utf8_lossy(key), e))
}

impl TokenStore {
    /// Creates a store over `backend`, computing TTLs from `clock`.
    #[must_use]
    pub fn new(backend: SharedBackend, clock: SharedClock) -> Self {
        Self { backend, clock }
    }

    /// Writes (or overwrites) `token`, expiring it at `token.expires_at`.
    ///
    /// # Errors
    ///
    /// [`AuthError::TokenExpired`] if the token has already expired, or a
    /// storage error.
    #[tracing::instrument(skip(self, token), fields(user_id = %token.user_id, token_id = %token.uuid))]
    pub async fn put(&self, token: &Token) -> Result<()> {
        let ttl = remaining(self.clock.now(), token.expires_at);
        if ttl.is_zero() {
            return Err(AuthError::TokenExpired);
        }

        let value = serde_json::to_vec(token).map_err(StorageError::from)?;
        self.backend
            .set_with_ttl(token_key(&token.user_id, token.uuid).into_bytes(), value, ttl)
            .await?;

        tracing::debug!(ttl_secs = ttl.as_secs(), "token record stored");
        Ok(())
    }

    /// Loads the record for `(subject, id)`, or `None` if it was revoked or
    /// has expired.
    ///
    /// # Errors
    ///
    /// Storage errors, or [`AuthError::CorruptRecord`].
    pub async fn get(&self, subject: &str, id: Uuid) -> Result<Option<Token>> {
        let key = token_key(subject, id);
        match self.backend.get(key.as_bytes()).await? {
            Some(value) => decode_token(key.as_bytes(), &value).map(Some),
            None => Ok(None),
        }
    }

    /// Every live token of `subject`, oldest first.
    ///
    /// # Errors
    ///
    /// Storage errors, or [`AuthError::CorruptRecord`].
    pub async fn list(&self, subject: &str) -> Result<Vec<Token>> {
        self.scan(subject_prefix(subject).as_bytes()).await
    }

    /// Every live token of every subject, oldest first.
    ///
    /// # Errors
    ///
    /// Storage errors, or [`AuthError::CorruptRecord`].
    pub async fn list_all(&self) -> Result<Vec<Token>> {
        self.scan(TOKEN_PREFIX.as_bytes()).await
    }

    /// Deletes the record for `(subject, id)`; its credential stops
    /// validating immediately. Revoking an unknown token is not an error.
    ///
    /// # Errors
    ///
    /// Storage errors.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, subject: &str, id: Uuid) -> Result<()> {
        self.backend.delete(token_key(subject, id).as_bytes()).await?;
        tracing::info!(
            audit.action = "token_revoked",
            audit.user_id = subject,
            audit.token_id = %id,
            "audit_event"
        );
        Ok(())
    }

    async fn scan(&self, prefix: &[u8]) -> Result<Vec<Token>> {
        let mut tokens = self
            .backend
            .get_prefix(prefix)
            .await?
            .into_iter()
            .map(|kv| decode_token(&kv.key, &kv.value))
            .collect::<Result<Vec<_>>>()?;
        tokens.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then(a.uuid.cmp(&b.uuid)));
        Ok(tokens)
    }
}
