//! Wiring every component from one configuration section.

use std::sync::Arc;

use apiguard_authn::{
    CertificateStore, KeySetSource, TokenIssuer, TokenStore, TokenValidator, VerificationKeyCache,
};
use apiguard_authz::{
    Authorizer, CachedMembership, EscalationGuard, MembershipSource, ServicePermissions,
    TokenService,
};
use apiguard_storage::{ConfigError, SharedBackend, SharedClock};
use bytes::Bytes;

use crate::{
    call::Call,
    chain::{Chain, Handler},
    config::GuardConfig,
    error::Result,
    ratelimit::RateLimiter,
    stages::{Authenticate, Authorize, RateLimit},
};

/// The assembled guard: interceptor chain, token service and key export
/// sharing one backend.
#[derive(Debug, Clone)]
pub struct Guard {
    chain: Chain,
    certs: CertificateStore,
    validator: Arc<TokenValidator>,
    authorizer: Authorizer,
    tokens: TokenService,
}

impl Guard {
    /// Validates `config` and builds every component over `backend`.
    ///
    /// `permissions` is the method table of the served API and `membership`
    /// the directory consulted for live project and tenant roles.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any configuration section is invalid.
    pub fn new(
        config: GuardConfig,
        backend: SharedBackend,
        clock: SharedClock,
        permissions: Arc<ServicePermissions>,
        membership: Arc<dyn MembershipSource>,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let GuardConfig { authn, authz, rate_limit } = config;

        let certs = CertificateStore::new(backend.clone(), clock.clone(), authn.clone());
        let token_store = TokenStore::new(backend.clone(), clock.clone());
        let source: Arc<dyn KeySetSource> = Arc::new(certs.clone());
        let validator = Arc::new(TokenValidator::new(
            VerificationKeyCache::new(source, authn.key_cache_ttl()),
            token_store.clone(),
            clock.clone(),
            &authn,
        ));
        let issuer = TokenIssuer::new(clock.clone(), authn.max_token_lifetime());

        let authorizer = Authorizer::new(permissions.clone());
        let escalation = EscalationGuard::new(
            permissions,
            CachedMembership::new(membership, authz.membership_cache_ttl()),
            authz,
        );
        let tokens = TokenService::new(certs.clone(), token_store, issuer, &authn, escalation);

        let limiter = RateLimiter::new(backend, clock, rate_limit.counter_ttl());
        let chain = Chain::new()
            .with(Authenticate::new(validator.clone()))
            .with(RateLimit::new(limiter, rate_limit))
            .with(Authorize::new(authorizer.clone()));

        tracing::info!(stages = ?chain, issuer = authn.issuer(), "guard assembled");
        Ok(Self { chain, certs, validator, authorizer, tokens })
    }

    /// Runs `call` through the chain into `handler`.
    ///
    /// # Errors
    ///
    /// See [`Chain::serve`].
    pub async fn serve(&self, call: Call, handler: &dyn Handler) -> Result<Bytes> {
        self.chain.serve(call, handler).await
    }

    /// The ordered interceptor chain.
    #[must_use]
    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Token lifecycle operations for the token service handlers.
    #[must_use]
    pub fn token_service(&self) -> &TokenService {
        &self.tokens
    }

    /// The credential validator used by the authenticate stage.
    #[must_use]
    pub fn validator(&self) -> &Arc<TokenValidator> {
        &self.validator
    }

    /// The authorizer used by the authorize stage.
    #[must_use]
    pub fn authorizer(&self) -> &Authorizer {
        &self.authorizer
    }

    /// The JSON Web Key Set of every currently valid signing certificate.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Authn`](crate::GuardError::Authn) if the
    /// certificates cannot be read.
    pub async fn jwks(&self) -> Result<Bytes> {
        Ok(self.certs.public_keys().await?.raw().clone())
    }
}
