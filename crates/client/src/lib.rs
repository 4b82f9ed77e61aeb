//! `lendops-client`
//!
//! **Responsibility:** Session lifecycle for the lending back office client.
//!
//! This crate provides:
//! - Credential persistence (token, refresh token, user snapshot)
//! - Sign-in, registration, restore, refresh and sign-out
//! - An authenticated HTTP gateway with one transparent re-validation on 401
//! - Translation of any failure into one user-facing message
//!
//! Permission rules live in `lendops-auth`; `SessionContext` binds them to the
//! signed-in user.

pub mod classify;
pub mod config;
pub mod context;
pub mod gateway;
pub mod session;
pub mod store;
pub mod wire;

pub use classify::{ErrorKind, RawFailure, UserMessage, classify};
pub use config::{ClientConfig, ConfigError};
pub use context::{Access, ContextError, SessionContext};
pub use gateway::{ApiGateway, GatewayError, RequestOptions, with_auth_retry};
pub use session::{InitOutcome, SessionManager, SessionState};
pub use store::{CredentialStore, FileCredentialStore, MemoryCredentialStore, StorageKey, StoreError};
pub use wire::RegistrationForm;
