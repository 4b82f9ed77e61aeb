//! Authenticated user profile as held by a session.
//!
//! The same shape is persisted as the last-known-good snapshot, so it must
//! round-trip through JSON with its derived fields (`permissions`, `roleName`)
//! intact.

use serde::{Deserialize, Serialize};

use lendops_core::{DomainError, DomainResult, UserId};

use crate::{Permission, Role};

/// Profile of the signed-in user plus the permission data derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "UserSnapshot")]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    /// Flattened permission names; may contain the wildcard.
    pub permissions: Vec<Permission>,
    /// Display label for the role.
    pub role_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

impl SessionUser {
    /// A user with no explicit grants; `role_name` falls back to the role itself.
    pub fn new(id: UserId, email: impl Into<String>, full_name: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            email: email.into(),
            full_name: full_name.into(),
            role,
            permissions: Vec::new(),
            role_name: role.as_str().to_string(),
            department: None,
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_role_name(mut self, role_name: impl Into<String>) -> Self {
        self.role_name = role_name.into();
        self
    }

    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }

    pub fn has_wildcard(&self) -> bool {
        self.permissions.iter().any(Permission::is_wildcard)
    }

    pub fn has_embedded(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p.as_str() == name)
    }

    /// Restore a user from a persisted snapshot.
    ///
    /// Fails when the JSON is malformed, when `id`, `email` or `role` is missing,
    /// or when the role is outside the closed role set.
    pub fn from_snapshot(json: &str) -> DomainResult<Self> {
        let raw: UserSnapshot = serde_json::from_str(json)
            .map_err(|e| DomainError::validation(format!("malformed user snapshot: {e}")))?;
        Self::try_from(raw)
    }

    pub fn to_snapshot(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Loosely-typed snapshot shape used for structural validation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserSnapshot {
    id: Option<String>,
    /// Document backends send `_id`, often alongside `id`.
    #[serde(rename = "_id")]
    object_id: Option<String>,
    email: Option<String>,
    full_name: Option<String>,
    role: Option<String>,
    #[serde(default)]
    permissions: Vec<String>,
    role_name: Option<String>,
    department: Option<String>,
}

fn required(value: Option<String>, field: &'static str) -> DomainResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(DomainError::missing(field)),
    }
}

impl TryFrom<UserSnapshot> for SessionUser {
    type Error = DomainError;

    fn try_from(raw: UserSnapshot) -> Result<Self, Self::Error> {
        let id = raw.id.filter(|v| !v.trim().is_empty()).or(raw.object_id);
        let id = UserId::new(required(id, "id")?)?;
        let email = required(raw.email, "email")?;
        let role: Role = required(raw.role, "role")?.parse()?;

        let role_name = raw
            .role_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| role.as_str().to_string());

        Ok(Self {
            id,
            email,
            full_name: raw.full_name.unwrap_or_default(),
            role,
            permissions: raw.permissions.into_iter().map(Permission::from).collect(),
            role_name,
            department: raw.department,
        })
    }
}
