//! Role catalogue boundary.
//!
//! The catalogue is the external source of truth mapping a user's role
//! assignments to granted permission names. The resolver consults it only after
//! the role override and the user's embedded permission list.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use lendops_core::UserId;

use crate::Permission;
use crate::permissions::WILDCARD;

/// A single permission entry inside a role document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PermissionGrant {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            description: None,
        }
    }
}

/// A role assigned to a user together with the permissions it grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<PermissionGrant>,
}

impl RoleAssignment {
    pub fn new<I, S>(name: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            permissions: permissions.into_iter().map(PermissionGrant::named).collect(),
        }
    }

    pub fn grants(&self, permission: &str) -> bool {
        self.permissions
            .iter()
            .any(|p| p.name == permission || p.name == WILDCARD)
    }
}

/// External role→permission catalogue.
pub trait RoleCatalogue: Send + Sync {
    /// All role assignments for a user (empty if unknown).
    fn user_roles(&self, user_id: &UserId) -> Vec<RoleAssignment>;

    fn has_permission(&self, user_id: &UserId, permission: &str) -> bool {
        self.user_roles(user_id).iter().any(|r| r.grants(permission))
    }

    fn can_access(&self, user_id: &UserId, resource: &str, action: &str) -> bool {
        self.has_permission(user_id, Permission::for_action(resource, action).as_str())
    }

    /// True while the catalogue is still fetching assignments.
    fn is_loading(&self) -> bool {
        false
    }
}

/// In-memory catalogue.
///
/// Used by tests and by applications that preload role assignments.
#[derive(Debug, Default)]
pub struct InMemoryRoleCatalogue {
    assignments: RwLock<HashMap<UserId, Vec<RoleAssignment>>>,
    loading: AtomicBool,
}

impl InMemoryRoleCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&self, user_id: UserId, role: RoleAssignment) {
        let mut map = self.assignments.write().unwrap_or_else(|e| e.into_inner());
        map.entry(user_id).or_default().push(role);
    }

    pub fn revoke_all(&self, user_id: &UserId) {
        let mut map = self.assignments.write().unwrap_or_else(|e| e.into_inner());
        map.remove(user_id);
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }
}

impl RoleCatalogue for InMemoryRoleCatalogue {
    fn user_roles(&self, user_id: &UserId) -> Vec<RoleAssignment> {
        let map = self.assignments.read().unwrap_or_else(|e| e.into_inner());
        map.get(user_id).cloned().unwrap_or_default()
    }

    fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }
}
