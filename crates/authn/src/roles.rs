//! Role enumerations carried by token records.
//!
//! Project and tenant roles form the total order
//! `Owner > Editor > Viewer > Guest > Unspecified`; `Ord` follows it. Every
//! role persists under an explicit wire name from a fixed table, so stored
//! records stay readable if variants are ever reordered or added.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A role name that is not in the table for its kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownRole {
    /// Which role kind was being parsed.
    pub kind: &'static str,
    /// The rejected name.
    pub value: String,
}

/// Defines a role enum whose variants are listed in ascending privilege
/// order, each with its persisted name.
///
/// Each generated type:
/// - Derives `Ord` in declaration order
/// - Serializes as its wire name
/// - Implements `Display` and `FromStr` over the same table
macro_rules! define_role {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(
            Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub enum $name {
            $(
                $(#[$vmeta])*
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            /// Every variant, least privileged first.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// The stable persisted name.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownRole;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(UnknownRole { kind: stringify!($name), value: other.to_string() }),
                }
            }
        }
    };
}

define_role! {
    /// Role within a single project.
    ProjectRole {
        /// No role.
        Unspecified => "PROJECT_ROLE_UNSPECIFIED",
        /// Read access to the project's public surface.
        Guest => "PROJECT_ROLE_GUEST",
        /// Read access.
        Viewer => "PROJECT_ROLE_VIEWER",
        /// Read and write access.
        Editor => "PROJECT_ROLE_EDITOR",
        /// Full control, including membership.
        Owner => "PROJECT_ROLE_OWNER",
    }
}

define_role! {
    /// Role within a tenant.
    TenantRole {
        /// No role.
        Unspecified => "TENANT_ROLE_UNSPECIFIED",
        /// Read access to the tenant's public surface.
        Guest => "TENANT_ROLE_GUEST",
        /// Read access.
        Viewer => "TENANT_ROLE_VIEWER",
        /// Read and write access.
        Editor => "TENANT_ROLE_EDITOR",
        /// Full control, including membership.
        Owner => "TENANT_ROLE_OWNER",
    }
}

define_role! {
    /// Global administrator role. Any admin role bypasses method checks.
    AdminRole {
        /// Read-only operator.
        Viewer => "ADMIN_ROLE_VIEWER",
        /// Full operator.
        Editor => "ADMIN_ROLE_EDITOR",
    }
}

define_role! {
    /// Role for infrastructure agents (switches, provisioning daemons).
    InfraRole {
        /// Read-only agent.
        Viewer => "INFRA_ROLE_VIEWER",
        /// Read-write agent.
        Editor => "INFRA_ROLE_EDITOR",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_project_role_total_order() {
        assert!(ProjectRole::Owner > ProjectRole::Editor);
        assert!(ProjectRole::Editor > ProjectRole::Viewer);
        assert!(ProjectRole::Viewer > ProjectRole::Guest);
        assert!(ProjectRole::Guest > ProjectRole::Unspecified);
        assert_eq!(ProjectRole::ALL.iter().max(), Some(&ProjectRole::Owner));
    }

    #[test]
    fn test_tenant_role_total_order() {
        let mut sorted = TenantRole::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, TenantRole::ALL);
        assert_eq!(sorted.last(), Some(&TenantRole::Owner));
    }

    #[rstest]
    #[case("PROJECT_ROLE_EDITOR", ProjectRole::Editor)]
    #[case("PROJECT_ROLE_OWNER", ProjectRole::Owner)]
    #[case("PROJECT_ROLE_UNSPECIFIED", ProjectRole::Unspecified)]
    fn test_project_role_from_str(#[case] name: &str, #[case] role: ProjectRole) {
        assert_eq!(name.parse::<ProjectRole>().unwrap(), role);
        assert_eq!(role.to_string(), name);
    }

    #[test]
    fn test_unknown_role_rejected() {
        let err = "TENANT_ROLE_EDITOR".parse::<ProjectRole>().unwrap_err();
        assert_eq!(err.kind, "ProjectRole");
        assert_eq!(err.to_string(), "unknown ProjectRole: TENANT_ROLE_EDITOR");
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&AdminRole::Editor).unwrap();
        assert_eq!(json, r#""ADMIN_ROLE_EDITOR""#);
        let role: InfraRole = serde_json::from_str(r#""INFRA_ROLE_VIEWER""#).unwrap();
        assert_eq!(role, InfraRole::Viewer);
        assert!(serde_json::from_str::<InfraRole>(r#""Viewer""#).is_err());
    }
}
