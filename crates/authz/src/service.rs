//! Token lifecycle operations on behalf of an authenticated caller.
//!
//! Every operation acts for the identity of the presented token and only
//! touches that identity's records, except the admin variants. Create,
//! update and refresh run the [`EscalationGuard`] before anything is
//! written, so a denied request leaves the token store untouched.

use std::{fmt, time::Duration};

use apiguard_authn::{
    AuthnConfig, CertificateStore, Grants, ProjectRole, TenantRole, Token, TokenIssuer,
    TokenStore, TokenType,
};
use uuid::Uuid;

use crate::{
    error::{AuthzError, Result},
    escalation::EscalationGuard,
};

/// Parameters of a new API token.
#[derive(Clone, Debug, bon::Builder)]
pub struct TokenRequest {
    /// Free-form label.
    #[builder(into, default)]
    pub description: String,
    /// How long the token is valid.
    pub lifetime: Duration,
    /// What the token may do.
    #[builder(default)]
    pub grants: Grants,
}

/// Changes to an existing token. Absent fields are left as they are.
#[derive(Clone, Debug, Default, bon::Builder)]
pub struct TokenUpdate {
    /// New label.
    #[builder(into)]
    pub description: Option<String>,
    /// New grants, replacing the old ones entirely.
    pub grants: Option<Grants>,
}

/// A freshly minted credential and its record.
#[derive(Clone)]
pub struct IssuedToken {
    /// The bearer credential. Shown to the caller once.
    pub credential: String,
    /// The stored record.
    pub token: Token,
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("credential", &"[REDACTED]")
            .field("token", &self.token)
            .finish()
    }
}

/// Creates, inspects, refreshes and revokes tokens.
#[derive(Clone, Debug)]
pub struct TokenService {
    certs: CertificateStore,
    tokens: TokenStore,
    issuer: TokenIssuer,
    issuer_name: String,
    guard: EscalationGuard,
}

impl TokenService {
    /// Creates a service signing with `certs` and persisting to `tokens`.
    #[must_use]
    pub fn new(
        certs: CertificateStore,
        tokens: TokenStore,
        issuer: TokenIssuer,
        config: &AuthnConfig,
        guard: EscalationGuard,
    ) -> Self {
        Self { certs, tokens, issuer, issuer_name: config.issuer().to_string(), guard }
    }

    /// The escalation guard in use.
    #[must_use]
    pub fn guard(&self) -> &EscalationGuard {
        &self.guard
    }

    /// Mints an API token for the acting identity.
    ///
    /// # Errors
    ///
    /// [`AuthzError::InvalidRequest`] if the lifetime is zero or above the
    /// maximum, an escalation denial, or an internal failure.
    #[tracing::instrument(skip_all, fields(user_id = %acting.user_id))]
    pub async fn create(&self, acting: &Token, request: TokenRequest) -> Result<IssuedToken> {
        self.check_lifetime(request.lifetime)?;
        self.guard.check(acting, &request.grants).await?;

        let issued = self
            .mint(
                TokenType::Api,
                &acting.user_id,
                request.lifetime,
                request.description,
                request.grants,
            )
            .await?;

        tracing::info!(
            audit.action = "token_created",
            audit.user_id = %acting.user_id,
            audit.token_id = %issued.token.uuid,
            audit.parent_token_id = %acting.uuid,
            "audit_event"
        );
        Ok(issued)
    }

    /// Changes the description or grants of one of the caller's tokens.
    ///
    /// # Errors
    ///
    /// [`AuthzError::TokenNotFound`], an escalation denial for new grants,
    /// or an internal failure.
    #[tracing::instrument(skip_all, fields(user_id = %acting.user_id, token_id = %id))]
    pub async fn update(&self, acting: &Token, id: Uuid, update: TokenUpdate) -> Result<Token> {
        let mut token = self.owned(acting, id).await?;

        if let Some(grants) = update.grants {
            self.guard.check(acting, &grants).await?;
            token.grants = grants;
        }
        if let Some(description) = update.description {
            token.description = description;
        }
        self.tokens.put(&token).await?;

        tracing::info!(
            audit.action = "token_updated",
            audit.user_id = %acting.user_id,
            audit.token_id = %id,
            "audit_event"
        );
        Ok(token)
    }

    /// Mints a successor of one of the caller's tokens with the same grants,
    /// type, description and lifetime. The old token stays valid until it
    /// expires or is revoked.
    ///
    /// # Errors
    ///
    /// [`AuthzError::TokenNotFound`], an escalation denial if the caller no
    /// longer holds the old grants, or an internal failure.
    #[tracing::instrument(skip_all, fields(user_id = %acting.user_id, token_id = %id))]
    pub async fn refresh(&self, acting: &Token, id: Uuid) -> Result<IssuedToken> {
        let previous = self.owned(acting, id).await?;
        self.guard.check(acting, &previous.grants).await?;

        let lifetime = previous.lifetime().min(self.issuer.max_lifetime());
        let issued = self
            .mint(
                previous.token_type,
                &acting.user_id,
                lifetime,
                previous.description,
                previous.grants,
            )
            .await?;

        tracing::info!(
            audit.action = "token_refreshed",
            audit.user_id = %acting.user_id,
            audit.token_id = %issued.token.uuid,
            audit.previous_token_id = %id,
            "audit_event"
        );
        Ok(issued)
    }

    /// Revokes one of the caller's tokens.
    ///
    /// # Errors
    ///
    /// [`AuthzError::TokenNotFound`] or an internal failure.
    pub async fn revoke(&self, acting: &Token, id: Uuid) -> Result<()> {
        self.owned(acting, id).await?;
        self.tokens.revoke(&acting.user_id, id).await?;
        Ok(())
    }

    /// One of the caller's tokens.
    ///
    /// # Errors
    ///
    /// [`AuthzError::TokenNotFound`] or an internal failure.
    pub async fn get(&self, acting: &Token, id: Uuid) -> Result<Token> {
        self.owned(acting, id).await
    }

    /// Every live token of the caller, oldest first.
    ///
    /// # Errors
    ///
    /// Internal failures only.
    pub async fn list(&self, acting: &Token) -> Result<Vec<Token>> {
        Ok(self.tokens.list(&acting.user_id).await?)
    }

    /// Every live token of every identity. Admin only.
    ///
    /// # Errors
    ///
    /// [`AuthzError::AdminRequired`] or an internal failure.
    pub async fn list_all(&self, acting: &Token) -> Result<Vec<Token>> {
        require_admin(acting)?;
        Ok(self.tokens.list_all().await?)
    }

    /// Revokes any identity's token. Admin only.
    ///
    /// # Errors
    ///
    /// [`AuthzError::AdminRequired`], [`AuthzError::TokenNotFound`] or an
    /// internal failure.
    #[tracing::instrument(skip_all, fields(user_id = %acting.user_id, target = user_id, token_id = %id))]
    pub async fn admin_revoke(&self, acting: &Token, user_id: &str, id: Uuid) -> Result<()> {
        require_admin(acting)?;
        if self.tokens.get(user_id, id).await?.is_none() {
            return Err(AuthzError::TokenNotFound(id));
        }
        self.tokens.revoke(user_id, id).await?;
        Ok(())
    }

    /// Mints a session token for a user who just signed in through the
    /// external login flow. Grants mirror the user's live memberships, plus
    /// the admin role if the user is entitled to it.
    ///
    /// # Errors
    ///
    /// [`AuthzError::InvalidRequest`] for a bad lifetime,
    /// [`AuthzError::Membership`] if the lookup fails, or an internal failure.
    #[tracing::instrument(skip(self))]
    pub async fn issue_session(&self, user_id: &str, lifetime: Duration) -> Result<IssuedToken> {
        self.check_lifetime(lifetime)?;
        let live = self.guard.membership().force_refresh(user_id).await?;

        let grants = Grants {
            project_roles: live
                .projects
                .iter()
                .filter(|(_, role)| **role > ProjectRole::Unspecified)
                .map(|(project, role)| (project.clone(), *role))
                .collect(),
            tenant_roles: live
                .tenants
                .iter()
                .filter(|(_, role)| **role > TenantRole::Unspecified)
                .map(|(tenant, role)| (tenant.clone(), *role))
                .collect(),
            admin_role: self.guard.admin_role_for(user_id, &live),
            ..Grants::default()
        };

        let issued =
            self.mint(TokenType::UserSession, user_id, lifetime, String::new(), grants).await?;
        tracing::info!(
            audit.action = "session_issued",
            audit.user_id = user_id,
            audit.token_id = %issued.token.uuid,
            audit.admin = issued.token.is_admin(),
            "audit_event"
        );
        Ok(issued)
    }

    fn check_lifetime(&self, lifetime: Duration) -> Result<()> {
        let max = self.issuer.max_lifetime();
        if lifetime.is_zero() || lifetime > max {
            return Err(AuthzError::InvalidRequest(format!(
                "token lifetime must be positive and at most {max:?}, got {lifetime:?}"
            )));
        }
        Ok(())
    }

    async fn owned(&self, acting: &Token, id: Uuid) -> Result<Token> {
        self.tokens.get(&acting.user_id, id).await?.ok_or(AuthzError::TokenNotFound(id))
    }

    async fn mint(
        &self,
        token_type: TokenType,
        user_id: &str,
        lifetime: Duration,
        description: String,
        grants: Grants,
    ) -> Result<IssuedToken> {
        let key = self.certs.latest_private().await?;
        let (credential, mut token) =
            self.issuer.issue(token_type, user_id, &self.issuer_name, lifetime, &key)?;
        token.description = description;
        token.grants = grants;
        self.tokens.put(&token).await?;
        Ok(IssuedToken { credential, token })
    }
}

fn require_admin(acting: &Token) -> Result<()> {
    if acting.is_admin() { Ok(()) } else { Err(AuthzError::AdminRequired) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use apiguard_authn::{AdminRole, AuthError, MethodPermission};

    use super::*;
    use crate::{
        membership::ProjectsAndTenants,
        testutil::{ADMIN_LOGIN, ADMIN_TENANT, AuthzHarness, methods},
    };

    const HOUR: Duration = Duration::from_secs(3600);

    async fn editor_session(harness: &AuthzHarness) -> IssuedToken {
        harness
            .membership
            .set("jo", ProjectsAndTenants::default().with_project("p1", ProjectRole::Editor));
        harness.service.issue_session("jo", HOUR).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_validates_and_is_listed() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;

        let request = TokenRequest::builder()
            .description("ci")
            .lifetime(Duration::from_secs(600))
            .grants(
                Grants::default()
                    .with_permission(MethodPermission::new("p1", [methods::IMAGE_GET])),
            )
            .build();
        let issued = harness.service.create(&session.token, request).await.unwrap();
        assert_eq!(issued.token.token_type, TokenType::Api);
        assert_eq!(issued.token.description, "ci");

        let validated = harness.authn.validator.validate(&issued.credential).await.unwrap();
        assert_eq!(validated, issued.token);

        let listed = harness.service.list(&session.token).await.unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_lifetime() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;

        for lifetime in [Duration::ZERO, HOUR + Duration::from_secs(1)] {
            let request = TokenRequest::builder().lifetime(lifetime).build();
            let err = harness.service.create(&session.token, request).await.unwrap_err();
            assert!(matches!(err, AuthzError::InvalidRequest(_)), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_denied_create_writes_nothing() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;

        let request = TokenRequest::builder()
            .lifetime(HOUR)
            .grants(Grants::default().with_project_role("p1", ProjectRole::Owner))
            .build();
        let err = harness.service.create(&session.token, request).await.unwrap_err();
        assert!(matches!(err, AuthzError::RoleEscalation { .. }));
        assert_eq!(harness.service.list(&session.token).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_grants_in_place() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;
        let request = TokenRequest::builder().lifetime(HOUR).build();
        let issued = harness.service.create(&session.token, request).await.unwrap();

        let update = TokenUpdate::builder()
            .description("deploy")
            .grants(Grants::default().with_project_role("p1", ProjectRole::Viewer))
            .build();
        let updated =
            harness.service.update(&session.token, issued.token.uuid, update).await.unwrap();
        assert_eq!(updated.description, "deploy");

        // The unchanged credential now resolves to the new grants.
        let validated = harness.authn.validator.validate(&issued.credential).await.unwrap();
        assert_eq!(validated.grants.project_roles.get("p1"), Some(&ProjectRole::Viewer));
    }

    #[tokio::test]
    async fn test_update_unknown_token() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;
        let id = Uuid::new_v4();

        let err = harness.service.update(&session.token, id, TokenUpdate::default()).await;
        assert!(matches!(err, Err(AuthzError::TokenNotFound(found)) if found == id));
    }

    #[tokio::test]
    async fn test_refresh_keeps_grants_and_old_token() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;
        let request = TokenRequest::builder()
            .description("ci")
            .lifetime(Duration::from_secs(900))
            .grants(Grants::default().with_project_role("p1", ProjectRole::Viewer))
            .build();
        let original = harness.service.create(&session.token, request).await.unwrap();

        harness.authn.clock.advance(Duration::from_secs(60));
        let refreshed =
            harness.service.refresh(&session.token, original.token.uuid).await.unwrap();

        assert_ne!(refreshed.token.uuid, original.token.uuid);
        assert_eq!(refreshed.token.grants, original.token.grants);
        assert_eq!(refreshed.token.description, "ci");
        assert_eq!(refreshed.token.lifetime(), Duration::from_secs(900));
        assert!(refreshed.token.expires_at > original.token.expires_at);
        harness.authn.validator.validate(&original.credential).await.unwrap();
        harness.authn.validator.validate(&refreshed.credential).await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_after_membership_loss_is_outdated() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;
        let request = TokenRequest::builder()
            .lifetime(HOUR)
            .grants(Grants::default().with_project_role("p1", ProjectRole::Editor))
            .build();
        let issued = harness.service.create(&session.token, request).await.unwrap();

        harness.membership.set("jo", ProjectsAndTenants::default());
        let err = harness.service.refresh(&session.token, issued.token.uuid).await.unwrap_err();
        assert!(matches!(err, AuthzError::OutdatedToken { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_revoke_only_own_tokens() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;
        let other = harness.service.issue_session("kim", HOUR).await.unwrap();

        let err = harness.service.revoke(&session.token, other.token.uuid).await.unwrap_err();
        assert!(matches!(err, AuthzError::TokenNotFound(_)));

        harness.service.revoke(&other.token, other.token.uuid).await.unwrap();
        let result = harness.authn.validator.validate(&other.credential).await;
        assert!(matches!(result, Err(AuthError::TokenRevoked)));
    }

    #[tokio::test]
    async fn test_admin_operations() {
        let harness = AuthzHarness::new();
        let session = editor_session(&harness).await;

        assert!(matches!(
            harness.service.list_all(&session.token).await,
            Err(AuthzError::AdminRequired)
        ));

        harness.membership.set(
            ADMIN_LOGIN,
            ProjectsAndTenants::default().with_tenant(ADMIN_TENANT, TenantRole::Owner),
        );
        let admin = harness.service.issue_session(ADMIN_LOGIN, HOUR).await.unwrap();
        assert_eq!(admin.token.grants.admin_role, Some(AdminRole::Editor));

        assert_eq!(harness.service.list_all(&admin.token).await.unwrap().len(), 2);
        harness.service.admin_revoke(&admin.token, "jo", session.token.uuid).await.unwrap();
        assert_eq!(harness.service.list_all(&admin.token).await.unwrap().len(), 1);

        let err = harness.service.admin_revoke(&admin.token, "jo", session.token.uuid).await;
        assert!(matches!(err, Err(AuthzError::TokenNotFound(_))));
    }

    #[tokio::test]
    async fn test_session_mirrors_memberships() {
        let harness = AuthzHarness::new();
        harness.membership.set(
            "lee",
            ProjectsAndTenants::default()
                .with_project("p1", ProjectRole::Owner)
                .with_project("p2", ProjectRole::Unspecified)
                .with_tenant("t1", TenantRole::Viewer),
        );

        let session = harness.service.issue_session("lee", HOUR).await.unwrap();
        assert_eq!(session.token.token_type, TokenType::UserSession);
        assert_eq!(session.token.grants.project_roles.len(), 1);
        assert_eq!(session.token.grants.tenant_roles.get("t1"), Some(&TenantRole::Viewer));
        assert_eq!(session.token.grants.admin_role, None);
    }

    #[test]
    fn test_issued_token_debug_redacts_credential() {
        let issued_at = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let issued = IssuedToken {
            credential: "eyJhbGciOiJFZERTQSJ9.secret.sig".into(),
            token: Token {
                uuid: Uuid::nil(),
                user_id: "x".into(),
                description: String::new(),
                issued_at,
                expires_at: issued_at,
                token_type: TokenType::Api,
                grants: Grants::default(),
            },
        };
        let debug = format!("{issued:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("secret"));
    }
}
