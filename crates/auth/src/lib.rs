//! `lendops-auth` — roles, permissions and the permission resolver.
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod catalogue;
pub mod permissions;
pub mod resolver;
pub mod roles;
pub mod user;

pub use catalogue::{InMemoryRoleCatalogue, PermissionGrant, RoleAssignment, RoleCatalogue};
pub use permissions::{Permission, WILDCARD};
pub use resolver::{Decision, DecisionSource, PermissionResolver};
pub use roles::Role;
pub use user::SessionUser;
