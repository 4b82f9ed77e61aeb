use core::str::FromStr;

use serde::{Deserialize, Serialize};

use lendops_core::DomainError;

/// Account role.
///
/// The back office issues exactly three roles. Anything else is rejected when a
/// session is established or restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Staff,
    Customer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Staff => "staff",
            Role::Customer => "customer",
        }
    }

    /// Admin is a universal override, not a large permission set.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Roles allowed to sign in to (and register for) the staff portal.
    pub fn can_use_staff_portal(&self) -> bool {
        matches!(self, Role::Admin | Role::Staff)
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "staff" => Ok(Role::Staff),
            "customer" => Ok(Role::Customer),
            other => Err(DomainError::invalid_role(other)),
        }
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
