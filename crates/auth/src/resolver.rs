//! Permission resolution for the signed-in user.
//!
//! Decisions short-circuit in a fixed order:
//!
//! 1. no user → deny
//! 2. role `admin` → allow (universal override)
//! 3. embedded wildcard → allow
//! 4. embedded exact name → allow
//! 5. role catalogue keyed by user id → allow iff granted
//!
//! Decisions are never cached; every query recomputes from the user passed in
//! and the catalogue's current contents.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::{Permission, RoleCatalogue, SessionUser};

/// Which step of the precedence chain settled a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    NoUser,
    AdminOverride,
    Wildcard,
    Embedded,
    Catalogue,
    /// The catalogue was still loading; treated as a denial.
    CataloguePending,
    NotGranted,
}

/// Outcome of a single permission query, with the step that decided it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub permission: String,
    pub allowed: bool,
    pub source: DecisionSource,
}

impl Decision {
    fn allow(permission: &str, source: DecisionSource) -> Self {
        Self {
            permission: permission.to_string(),
            allowed: true,
            source,
        }
    }

    fn deny(permission: &str, source: DecisionSource) -> Self {
        Self {
            permission: permission.to_string(),
            allowed: false,
            source,
        }
    }
}

/// Three-tier resolver: role override, embedded list, role catalogue.
#[derive(Clone)]
pub struct PermissionResolver {
    catalogue: Arc<dyn RoleCatalogue>,
}

impl core::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("catalogue_loading", &self.catalogue.is_loading())
            .finish()
    }
}

impl PermissionResolver {
    pub fn new(catalogue: Arc<dyn RoleCatalogue>) -> Self {
        Self { catalogue }
    }

    pub fn catalogue(&self) -> &Arc<dyn RoleCatalogue> {
        &self.catalogue
    }

    /// Steps 1–4; `None` means the catalogue has to decide.
    fn decide_locally(user: Option<&SessionUser>, name: &str) -> Option<Decision> {
        let Some(user) = user else {
            return Some(Decision::deny(name, DecisionSource::NoUser));
        };
        if user.role.is_admin() {
            return Some(Decision::allow(name, DecisionSource::AdminOverride));
        }
        if user.has_wildcard() {
            return Some(Decision::allow(name, DecisionSource::Wildcard));
        }
        if user.has_embedded(name) {
            return Some(Decision::allow(name, DecisionSource::Embedded));
        }
        None
    }

    fn from_catalogue(&self, name: &str, granted: impl FnOnce() -> bool) -> Decision {
        if self.catalogue.is_loading() {
            return Decision::deny(name, DecisionSource::CataloguePending);
        }
        if granted() {
            Decision::allow(name, DecisionSource::Catalogue)
        } else {
            Decision::deny(name, DecisionSource::NotGranted)
        }
    }

    /// Resolve a permission name and report which step decided it.
    pub fn decide(&self, user: Option<&SessionUser>, permission: &str) -> Decision {
        if let Some(decision) = Self::decide_locally(user, permission) {
            return decision;
        }
        let Some(user) = user else {
            return Decision::deny(permission, DecisionSource::NoUser);
        };
        let decision = self.from_catalogue(permission, || {
            self.catalogue.has_permission(&user.id, permission)
        });
        if !decision.allowed {
            tracing::debug!(user_id = %user.id, permission, source = ?decision.source, "permission denied");
        }
        decision
    }

    /// Resolve an action on a resource.
    ///
    /// The embedded list is checked for the composed name `{action}_{resource}`;
    /// the catalogue is asked with the resource/action pair.
    pub fn decide_access(&self, user: Option<&SessionUser>, resource: &str, action: &str) -> Decision {
        let composed = Permission::for_action(resource, action);
        if let Some(decision) = Self::decide_locally(user, composed.as_str()) {
            return decision;
        }
        let Some(user) = user else {
            return Decision::deny(composed.as_str(), DecisionSource::NoUser);
        };
        self.from_catalogue(composed.as_str(), || {
            self.catalogue.can_access(&user.id, resource, action)
        })
    }

    pub fn has_permission(&self, user: Option<&SessionUser>, permission: &str) -> bool {
        self.decide(user, permission).allowed
    }

    pub fn can_access(&self, user: Option<&SessionUser>, resource: &str, action: &str) -> bool {
        self.decide_access(user, resource, action).allowed
    }

    /// True if any name resolves to allow. An empty list is never satisfied.
    pub fn has_any<I, S>(&self, user: Option<&SessionUser>, permissions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match user {
            None => false,
            Some(u) if u.role.is_admin() => true,
            Some(_) => permissions
                .into_iter()
                .any(|p| self.has_permission(user, p.as_ref())),
        }
    }

    /// True if every name resolves to allow. An empty list is vacuously
    /// satisfied for a signed-in user.
    pub fn has_all<I, S>(&self, user: Option<&SessionUser>, permissions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        match user {
            None => false,
            Some(u) if u.role.is_admin() => true,
            Some(_) => permissions
                .into_iter()
                .all(|p| self.has_permission(user, p.as_ref())),
        }
    }

    /// Admins get the wildcard singleton; everyone else gets the de-duplicated
    /// union of the catalogue's role assignments.
    pub fn all_permissions(&self, user: Option<&SessionUser>) -> HashSet<Permission> {
        let Some(user) = user else {
            return HashSet::new();
        };
        if user.role.is_admin() {
            return HashSet::from([Permission::wildcard()]);
        }
        self.catalogue
            .user_roles(&user.id)
            .into_iter()
            .flat_map(|role| role.permissions)
            .map(|grant| Permission::from(grant.name))
            .collect()
    }
}
