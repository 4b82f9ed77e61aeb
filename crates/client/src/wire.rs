//! Request/response shapes of the back office user endpoints.
//!
//! Field names follow the backend's camelCase JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use lendops_auth::{Permission, Role, RoleAssignment, SessionUser};
use lendops_core::{DomainError, DomainResult, RoleId, UserId};

pub const SIGN_IN_PATH: &str = "/api/users/signin";
pub const REGISTER_PATH: &str = "/api/users/create";
pub const PROFILE_PATH: &str = "/api/users/me";

#[derive(Debug, Clone, Serialize)]
pub struct SignInRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// User record as returned by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Document backends send `_id`, often alongside `id`.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub department: Option<String>,
}

impl ApiUser {
    /// `id` when present and non-blank, otherwise `_id`.
    pub fn id(&self) -> Option<&str> {
        [self.id.as_deref(), self.object_id.as_deref()]
            .into_iter()
            .flatten()
            .find(|v| !v.trim().is_empty())
    }

    fn display_name(&self) -> String {
        if let Some(full) = self.full_name.as_deref().filter(|n| !n.trim().is_empty()) {
            return full.trim().to_string();
        }
        join_name(self.first_name.as_deref(), self.last_name.as_deref())
    }
}

/// Response of sign-in and registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: ApiUser,
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Response of the profile endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user: ApiUser,
    /// Role documents keyed by role id.
    #[serde(default)]
    pub user_roles: Option<BTreeMap<RoleId, RoleAssignment>>,
    /// Present when the backend rotated the refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl ProfileResponse {
    /// Build the session user, flattening role documents into `permissions`
    /// and `role_name`.
    ///
    /// Without role documents the user is permission-less (not an error) and
    /// `role_name` falls back to the department, then the raw role.
    pub fn into_session_user(self) -> DomainResult<SessionUser> {
        let id = UserId::new(self.user.id().ok_or_else(|| DomainError::missing("id"))?)?;
        if self.user.email.trim().is_empty() {
            return Err(DomainError::missing("email"));
        }
        let role: Role = self.user.role.parse()?;

        let documents: Vec<RoleAssignment> = self
            .user_roles
            .map(|roles| roles.into_values().collect())
            .unwrap_or_default();

        let mut permissions: Vec<Permission> = Vec::new();
        let mut names: Vec<String> = Vec::new();
        for document in documents {
            let name = document.name.trim();
            if !name.is_empty() && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
            for grant in document.permissions {
                if !permissions.iter().any(|p| p.as_str() == grant.name) {
                    permissions.push(Permission::from(grant.name));
                }
            }
        }

        let role_name = if names.is_empty() {
            self.user
                .department
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| self.user.role.trim().to_string())
        } else {
            names.join(", ")
        };

        let mut user = SessionUser::new(id, self.user.email.trim(), self.user.display_name(), role)
            .with_permissions(permissions)
            .with_role_name(role_name);
        if let Some(department) = self.user.department.filter(|d| !d.trim().is_empty()) {
            user = user.with_department(department);
        }
        Ok(user)
    }
}

/// Registration form as filled in by an administrator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staff_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Registration form merged with the fields the backend derives nothing for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationPayload<'a> {
    #[serde(flatten)]
    pub form: &'a RegistrationForm,
    pub confirm_email: &'a str,
    pub full_name: String,
    pub two_factor_enabled: bool,
    pub is_two_factor_auth_enabled: bool,
}

impl<'a> RegistrationPayload<'a> {
    pub fn from_form(form: &'a RegistrationForm) -> Self {
        Self {
            form,
            confirm_email: &form.email,
            full_name: join_name(Some(&form.first_name), Some(&form.last_name)),
            two_factor_enabled: false,
            is_two_factor_auth_enabled: false,
        }
    }
}

fn join_name(first: Option<&str>, last: Option<&str>) -> String {
    [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
