//! The guard's three interceptors.
//!
//! They must be chained as `Authenticate → RateLimit → Authorize`:
//! rate limiting keys on the identity the first stage attaches, and only
//! the last stage may reject a call for lacking one.

use std::sync::Arc;

use apiguard_authn::{Token, TokenValidator};
use apiguard_authz::Authorizer;
use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    call::{Call, bearer, client_address},
    chain::{Interceptor, Next},
    config::RateLimitConfig,
    error::Result,
    ratelimit::RateLimiter,
};

/// Validates the bearer credential and attaches its token record.
///
/// Calls without an `authorization` header pass through anonymously.
#[derive(Debug, Clone)]
pub struct Authenticate {
    validator: Arc<TokenValidator>,
}

impl Authenticate {
    /// Creates the stage.
    #[must_use]
    pub fn new(validator: Arc<TokenValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl Interceptor for Authenticate {
    fn name(&self) -> &'static str {
        "authenticate"
    }

    async fn intercept(&self, mut call: Call, next: Next<'_>) -> Result<Bytes> {
        let credential = bearer(call.metadata())?.map(str::to_owned);
        if let Some(credential) = credential {
            let token = self.validator.validate(&credential).await?;
            tracing::debug!(user_id = %token.user_id, token_id = %token.uuid, "call authenticated");
            call.set_identity(token);
        }
        next.run(call).await
    }
}

/// Counts calls per token, or per client address for anonymous calls.
///
/// Admin tokens are never counted.
#[derive(Debug, Clone)]
pub struct RateLimit {
    limiter: RateLimiter,
    config: RateLimitConfig,
}

impl RateLimit {
    /// Creates the stage with the quotas of `config`.
    #[must_use]
    pub fn new(limiter: RateLimiter, config: RateLimitConfig) -> Self {
        Self { limiter, config }
    }

    fn quota(&self, call: &Call) -> (String, u32) {
        match call.identity() {
            Some(token) => (
                format!("token/{}/{}", token.user_id, token.uuid),
                self.config.authenticated_per_minute(),
            ),
            None => (format!("ip/{}", client_address(call)), self.config.unauthenticated_per_minute()),
        }
    }
}

#[async_trait]
impl Interceptor for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Bytes> {
        if !call.identity().is_some_and(Token::is_admin) {
            let (key, limit) = self.quota(&call);
            self.limiter.check(&key, limit).await?;
        }
        next.run(call).await
    }
}

/// Allows or denies the call's method and subject for its identity.
#[derive(Debug, Clone)]
pub struct Authorize {
    authorizer: Authorizer,
}

impl Authorize {
    /// Creates the stage.
    #[must_use]
    pub fn new(authorizer: Authorizer) -> Self {
        Self { authorizer }
    }
}

#[async_trait]
impl Interceptor for Authorize {
    fn name(&self) -> &'static str {
        "authorize"
    }

    async fn intercept(&self, call: Call, next: Next<'_>) -> Result<Bytes> {
        self.authorizer.authorize(call.identity(), call.method(), call.subject())?;
        next.run(call).await
    }
}
