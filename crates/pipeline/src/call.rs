//! The inbound call as seen by the interceptor chain.

use std::net::SocketAddr;

use apiguard_authn::Token;
use bytes::Bytes;
use http::{HeaderMap, header::AUTHORIZATION};
use tokio_util::sync::CancellationToken;

use crate::error::{GuardError, Result};

const BEARER_SCHEME: &str = "bearer ";

/// Placeholder address when nothing identifies the client.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// One remote procedure call travelling through the chain.
///
/// Built by the transport layer; the authenticate stage attaches the
/// resolved identity with [`Call::set_identity`].
#[derive(Debug, Clone, bon::Builder)]
pub struct Call {
    /// Fully qualified method name, e.g. `/apiguard.v1.ImageService/Get`.
    #[builder(into)]
    method: String,
    /// Project or tenant the call targets, if any.
    #[builder(into)]
    subject: Option<String>,
    #[builder(default)]
    metadata: HeaderMap,
    remote_addr: Option<SocketAddr>,
    #[builder(default)]
    body: Bytes,
    #[builder(default)]
    cancellation: CancellationToken,
    #[builder(skip)]
    identity: Option<Token>,
}

impl Call {
    /// Fully qualified method name.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Targeted project or tenant.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Request headers.
    #[must_use]
    pub fn metadata(&self) -> &HeaderMap {
        &self.metadata
    }

    /// Transport peer address.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Request payload, untouched by the chain.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Cancelled when the caller gives up.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The authenticated token record, `None` for anonymous calls.
    #[must_use]
    pub fn identity(&self) -> Option<&Token> {
        self.identity.as_ref()
    }

    /// Attaches the authenticated token record.
    pub fn set_identity(&mut self, token: Token) {
        self.identity = Some(token);
    }
}

/// The address a call is attributed to when it carries no token.
///
/// Prefers the first `x-forwarded-for` entry, then `x-real-ip`, then the
/// transport peer.
#[must_use]
pub fn client_address(call: &Call) -> String {
    let header = |name: &str| {
        call.metadata()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
    {
        return first.to_string();
    }
    if let Some(real_ip) = header("x-real-ip") {
        return real_ip.to_string();
    }
    call.remote_addr()
        .map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.ip().to_string())
}

/// Extracts the bearer credential from `authorization`.
///
/// A missing header is an anonymous call, not an error.
///
/// # Errors
///
/// [`GuardError::InvalidHeader`] if the header is not valid text, uses
/// another scheme, or carries an empty credential.
pub fn bearer(headers: &HeaderMap) -> Result<Option<&str>> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| GuardError::InvalidHeader("value is not visible ASCII".into()))?;

    let scheme_matches = value
        .get(..BEARER_SCHEME.len())
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case(BEARER_SCHEME));
    if !scheme_matches {
        return Err(GuardError::InvalidHeader("expected the Bearer scheme".into()));
    }

    let credential = value[BEARER_SCHEME.len()..].trim();
    if credential.is_empty() {
        return Err(GuardError::InvalidHeader("empty credential".into()));
    }
    Ok(Some(credential))
}
