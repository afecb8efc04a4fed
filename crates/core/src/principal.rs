//! Principals and authorization scopes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

/// Authorization scopes granted to a principal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Read access (pull, realtime, blob download).
    #[serde(rename = "vault:read")]
    Read,
    /// Write access (push, blob upload, key envelopes).
    #[serde(rename = "vault:write")]
    Write,
    /// Admin access (vault creation, token management).
    #[serde(rename = "vault:admin")]
    Admin,
}

impl Scope {
    /// Parse from string.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "vault:read" => Ok(Self::Read),
            "vault:write" => Ok(Self::Write),
            "vault:admin" => Ok(Self::Admin),
            _ => Err(crate::Error::UnknownScope(s.to_string())),
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "vault:read",
            Self::Write => "vault:write",
            Self::Admin => "vault:admin",
        }
    }

    /// Check if this scope implies another scope.
    ///
    /// Admin implies everything. Read and write are siblings: holding one
    /// grants nothing about the other.
    pub fn implies(&self, other: &Self) -> bool {
        match self {
            Self::Admin => true,
            Self::Write => matches!(other, Self::Write),
            Self::Read => matches!(other, Self::Read),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a principal was authenticated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// An API token presented as a bearer credential.
    ApiToken,
    /// Resolved by an external authentication collaborator.
    External,
}

/// An authenticated identity with its granted scope set.
///
/// The core does not mint principals; it consumes ones already resolved by
/// the authentication layer.
#[derive(Clone, Debug)]
pub struct Principal {
    /// Owning user identity.
    pub user_id: Uuid,
    /// Granted scopes.
    pub scopes: HashSet<Scope>,
    /// Credential kind this principal was resolved from.
    pub auth_type: AuthType,
}

impl Principal {
    /// Check if the principal holds a scope (directly or by implication).
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.iter().any(|s| s.implies(&scope))
    }
}
