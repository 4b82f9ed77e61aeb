//! Process-wide wiring of the session and permission layers.
//!
//! Built once at start-up and passed to whatever needs it; there is no global.

use std::collections::HashSet;
use std::sync::Arc;

use lendops_auth::{Decision, Permission, PermissionResolver, RoleCatalogue, SessionUser};

use crate::config::ClientConfig;
use crate::gateway::{ApiGateway, GatewayError};
use crate::session::SessionManager;
use crate::store::{CredentialStore, FileCredentialStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    session: SessionManager,
    resolver: Arc<PermissionResolver>,
}

impl SessionContext {
    pub fn new(session: SessionManager, resolver: PermissionResolver) -> Self {
        Self {
            session,
            resolver: Arc::new(resolver),
        }
    }

    /// File-backed store (configured path or the OS data directory), gateway,
    /// session manager and resolver.
    pub fn from_config(config: ClientConfig, catalogue: Arc<dyn RoleCatalogue>) -> Result<Self, ContextError> {
        let store: Arc<dyn CredentialStore> = match &config.session_file {
            Some(path) => Arc::new(FileCredentialStore::new(path)),
            None => Arc::new(FileCredentialStore::in_data_dir()?),
        };
        Self::with_store(config, store, catalogue)
    }

    /// `from_config`, then restore the stored session before returning.
    ///
    /// Background revalidation of a restored session keeps running after this
    /// returns.
    pub async fn start(config: ClientConfig, catalogue: Arc<dyn RoleCatalogue>) -> Result<Self, ContextError> {
        let ctx = Self::from_config(config, catalogue)?;
        let outcome = ctx.session.initialize().await;
        tracing::debug!(?outcome, "session context started");
        Ok(ctx)
    }

    pub fn with_store(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
        catalogue: Arc<dyn RoleCatalogue>,
    ) -> Result<Self, ContextError> {
        let gateway = ApiGateway::new(config, store)?;
        Ok(Self::new(
            SessionManager::with_gateway(gateway),
            PermissionResolver::new(catalogue),
        ))
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    /// Permission checks against the user signed in right now.
    pub fn access(&self) -> Access {
        Access {
            user: self.session.current_user(),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

/// Permission view bound to one user snapshot.
#[derive(Debug, Clone)]
pub struct Access {
    user: Option<SessionUser>,
    resolver: Arc<PermissionResolver>,
}

impl Access {
    pub fn user(&self) -> Option<&SessionUser> {
        self.user.as_ref()
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.resolver.has_permission(self.user(), permission)
    }

    pub fn can_access(&self, resource: &str, action: &str) -> bool {
        self.resolver.can_access(self.user(), resource, action)
    }

    pub fn has_any<I, S>(&self, permissions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolver.has_any(self.user(), permissions)
    }

    pub fn has_all<I, S>(&self, permissions: I) -> bool
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.resolver.has_all(self.user(), permissions)
    }

    pub fn all_permissions(&self) -> HashSet<Permission> {
        self.resolver.all_permissions(self.user())
    }

    pub fn explain(&self, permission: &str) -> Decision {
        self.resolver.decide(self.user(), permission)
    }
}
