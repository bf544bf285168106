// Authentication module
// Decision: Bearer JWT decoding to (user_id, tenant_id, role, exp)
// Decision: Roles form a total order; endpoint guards compare against it

pub mod jwt;
pub mod middleware;

pub use jwt::{create_token, decode_token};
pub use middleware::AuthSettings;

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// User roles with hierarchical permissions.
///
/// Ordering is part of the contract: viewer < member < admin < owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-only access
    Viewer,
    /// Create / edit / execute workflows
    Member,
    /// Manage workflows & executions, delete
    Admin,
    /// Full access (tenant admin)
    Owner,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "viewer" => Ok(Role::Viewer),
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "owner" => Ok(Role::Owner),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Authentication context for a request, injected after JWT
/// verification
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub tenant_id: String,
    pub role: Role,
    pub exp: DateTime<Utc>,
}

impl AuthContext {
    /// Check the caller holds at least the required role
    pub fn require(&self, required: Role) -> Result<(), ApiError> {
        if self.role >= required {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "Requires {} role or above",
                required.as_str()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(Role::Viewer < Role::Member);
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn test_require_role() {
        let auth = AuthContext {
            user_id: "u1".to_string(),
            tenant_id: "t1".to_string(),
            role: Role::Member,
            exp: Utc::now(),
        };

        assert!(auth.require(Role::Viewer).is_ok());
        assert!(auth.require(Role::Member).is_ok());
        assert!(auth.require(Role::Admin).is_err());
    }
}
