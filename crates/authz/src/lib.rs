//! # apiguard authorization
//!
//! Turns a validated [`Token`](apiguard_authn::Token) into allow/deny
//! decisions, and keeps token issuance from ever producing a token more
//! powerful than the one that asked for it.
//!
//! - [`effective_permissions`]: pure merge of explicit permissions, project
//!   roles, tenant roles and the infra role through a [`ServicePermissions`]
//!   table
//! - [`Authorizer`]: per-call decision honouring public, self-service,
//!   admin-only and scoped methods
//! - [`EscalationGuard`]: subset check against the acting token, then
//!   against live memberships
//! - [`TokenService`]: create, update, refresh, revoke and list tokens, with
//!   the guard in front of every write
//!
//! ## Example
//!
//! ```
//! use apiguard_authn::{Grants, ProjectRole};
//! use apiguard_authz::{ServicePermissions, effective_permissions};
//!
//! let table = ServicePermissions::new()
//!     .project_role(ProjectRole::Editor, ["/api.v1.Image/Create"]);
//! let grants = Grants::default().with_project_role("p1", ProjectRole::Editor);
//!
//! let effective = effective_permissions(&grants, &table);
//! assert!(effective.check("/api.v1.Image/Create", Some("p1")).is_ok());
//! assert!(effective.check("/api.v1.Image/Create", Some("p2")).is_err());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Per-call authorization.
pub mod authorizer;
/// Authorization settings.
pub mod config;
/// Authorization error types.
pub mod error;
/// Escalation prevention.
pub mod escalation;
/// Live memberships and their cache.
pub mod membership;
/// Method table and effective permissions.
pub mod permissions;
/// Token lifecycle.
pub mod service;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use authorizer::Authorizer;
pub use config::AuthzConfig;
pub use error::{AuthzError, Result};
pub use escalation::EscalationGuard;
pub use membership::{CachedMembership, MembershipSource, ProjectsAndTenants};
pub use permissions::{
    ANY_SUBJECT, EffectivePermissions, MethodVisibility, ServicePermissions, effective_permissions,
};
pub use service::{IssuedToken, TokenRequest, TokenService, TokenUpdate};
