//! # apiguard request pipeline
//!
//! Puts authentication, rate limiting and authorization in front of every
//! call, in that order:
//!
//! ```text
//! call ─► Authenticate ─► RateLimit ─► Authorize ─► handler
//! ```
//!
//! - [`Authenticate`] validates an optional `authorization: Bearer` header
//!   and attaches the token record; anonymous calls pass
//! - [`RateLimit`] counts calls per token, or per client address when
//!   anonymous, in fixed one-minute windows; admin tokens are exempt
//! - [`Authorize`] is the only stage that rejects a call for lacking an
//!   identity
//!
//! [`Guard`] assembles all of it from a [`GuardConfig`], and every
//! [`GuardError`] converts into a [`tonic::Status`] with internal details
//! stripped.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Inbound call context and header parsing.
pub mod call;
/// Interceptor traits and the ordered chain.
pub mod chain;
/// Pipeline configuration.
pub mod config;
/// Pipeline errors and status mapping.
pub mod error;
/// Assembly of every component.
pub mod guard;
/// Per-minute request counting.
pub mod ratelimit;
/// Authenticate, rate-limit and authorize stages.
pub mod stages;

pub use call::{Call, UNKNOWN_CLIENT, bearer, client_address};
pub use chain::{Chain, Handler, Interceptor, Next};
pub use config::{GuardConfig, RateLimitConfig};
pub use error::{GuardError, RATE_LIMIT_HEADER, Result};
pub use guard::Guard;
pub use ratelimit::RateLimiter;
pub use stages::{Authenticate, Authorize, RateLimit};
