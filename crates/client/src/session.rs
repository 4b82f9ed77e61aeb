//! Session lifecycle: restore, sign-in, registration, refresh and sign-out.
//!
//! A `SessionManager` owns one `SessionState` and publishes it through a
//! `watch` channel. Every mutation replaces the state as a whole, so observers
//! never see a user without its tokens or a half-applied refresh.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use serde::Serialize;
use tokio::sync::{OnceCell, watch};
use tokio::task::JoinHandle;

use lendops_auth::{Role, SessionUser};
use lendops_core::DomainError;

use crate::classify::{ErrorKind, RawFailure, UserMessage, classify};
use crate::config::ClientConfig;
use crate::gateway::{ApiGateway, GatewayError, RequestOptions, decode};
use crate::store::{CredentialStore, StorageKey};
use crate::wire::{
    AuthResponse, PROFILE_PATH, ProfileResponse, REGISTER_PATH, RegistrationForm, RegistrationPayload,
    SIGN_IN_PATH, SignInRequest,
};

pub const MIN_PASSWORD_CHARS: usize = 8;
pub const MISSING_CREDENTIALS: &str = "Email and password are required.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub user: Option<SessionUser>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub is_loading: bool,
    /// Flips to true once, when `initialize` completes.
    pub initialized: bool,
    /// False while the session is only restored from storage.
    pub validated: bool,
    pub validated_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.access_token.is_some()
    }

    fn clear_credentials(&mut self) {
        self.user = None;
        self.access_token = None;
        self.refresh_token = None;
        self.validated = false;
        self.validated_at = None;
    }
}

/// What `initialize` found in the credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Nothing stored.
    Anonymous,
    /// A structurally valid session was restored; revalidation runs in the background.
    Restored,
    /// Stored data was incomplete or invalid and has been cleared.
    Discarded,
    /// A previous call already initialized this manager.
    AlreadyInitialized,
}

type RefreshFuture = Shared<BoxFuture<'static, Result<(), UserMessage>>>;
type WeakRefresh = WeakShared<BoxFuture<'static, Result<(), UserMessage>>>;

struct Inner {
    store: Arc<dyn CredentialStore>,
    gateway: ApiGateway,
    state: watch::Sender<SessionState>,
    init: OnceCell<InitOutcome>,
    /// Only awaiters own the flight; the slot must not keep `Inner` alive.
    in_flight: Mutex<Option<WeakRefresh>>,
    revalidation: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a session; clones share the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionManager")
            .field("gateway", &self.inner.gateway)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl SessionManager {
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, GatewayError> {
        let gateway = ApiGateway::new(config, Arc::clone(&store))?;
        Ok(Self::with_gateway(gateway))
    }

    pub fn with_gateway(gateway: ApiGateway) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Self {
            inner: Arc::new(Inner {
                store: Arc::clone(gateway.store()),
                gateway,
                state,
                init: OnceCell::new(),
                in_flight: Mutex::new(None),
                revalidation: Mutex::new(None),
            }),
        }
    }

    pub fn gateway(&self) -> &ApiGateway {
        &self.inner.gateway
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn current_user(&self) -> Option<SessionUser> {
        self.inner.state.borrow().user.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated()
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        self.inner.state.send_modify(f);
    }

    /// Restore the session from the credential store, once per manager.
    ///
    /// A restored session is published immediately with `validated == false`
    /// and confirmed against the server on a background task.
    pub async fn initialize(&self) -> InitOutcome {
        let mut ran = false;
        let outcome = *self
            .inner
            .init
            .get_or_init(|| {
                ran = true;
                self.restore()
            })
            .await;
        if ran { outcome } else { InitOutcome::AlreadyInitialized }
    }

    async fn restore(&self) -> InitOutcome {
        self.update(|s| s.is_loading = true);

        let token = self.inner.store.get(StorageKey::Token);
        let snapshot = self.inner.store.get(StorageKey::User);

        let outcome = match (token, snapshot) {
            (None, None) => {
                self.clear_session();
                InitOutcome::Anonymous
            }
            (Some(token), Some(snapshot)) => match SessionUser::from_snapshot(&snapshot) {
                Ok(user) => {
                    tracing::info!(user_id = %user.id, "restored stored session");
                    let refresh = self.inner.store.get(StorageKey::RefreshToken);
                    self.update(|s| {
                        s.user = Some(user);
                        s.access_token = Some(token);
                        s.refresh_token = refresh;
                        s.validated = false;
                        s.validated_at = None;
                    });
                    InitOutcome::Restored
                }
                Err(err) => {
                    tracing::warn!(error = %err, "discarding invalid stored session");
                    self.clear_session();
                    InitOutcome::Discarded
                }
            },
            _ => {
                tracing::warn!("discarding incomplete stored session");
                self.clear_session();
                InitOutcome::Discarded
            }
        };

        self.update(|s| {
            s.is_loading = false;
            s.initialized = true;
        });

        if outcome == InitOutcome::Restored {
            let this = self.clone();
            let handle = tokio::spawn(async move {
                if let Err(err) = this.refresh().await {
                    tracing::warn!(error = %err, "background session revalidation failed");
                }
            });
            *lock(&self.inner.revalidation) = Some(handle);
        }
        outcome
    }

    /// Wait for the background revalidation started by `initialize`, if any.
    pub async fn wait_for_revalidation(&self) {
        let handle = lock(&self.inner.revalidation).take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "revalidation task did not complete");
            }
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<SessionUser, UserMessage> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(self.reject(UserMessage::Detail(MISSING_CREDENTIALS.to_string())));
        }

        self.update(|s| s.is_loading = true);
        let result = self.sign_in(email, password).await;
        let result = self.finish(result);
        if let Ok(user) = &result {
            tracing::info!(user_id = %user.id, role = %user.role, "signed in");
        }
        result
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionUser, UserMessage> {
        let options = json_options(&SignInRequest { email, password }).map_err(gateway_message)?;
        let response = self
            .inner
            .gateway
            .public_request(SIGN_IN_PATH, options)
            .await
            .map_err(gateway_message)?;
        let auth: AuthResponse = decode(response).await.map_err(gateway_message)?;
        self.establish(auth).await
    }

    /// Create an account and sign in as it.
    pub async fn register(&self, form: &RegistrationForm) -> Result<SessionUser, UserMessage> {
        if form.password != form.confirm_password {
            return Err(self.reject(ErrorKind::PasswordMismatch.into()));
        }
        if form.password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(self.reject(ErrorKind::WeakPassword.into()));
        }
        if !form
            .role
            .parse::<Role>()
            .is_ok_and(|role| role.can_use_staff_portal())
        {
            return Err(self.reject(ErrorKind::InvalidRole.into()));
        }

        self.update(|s| s.is_loading = true);
        let result = self.create_account(form).await.map_err(|msg| {
            if msg.is(ErrorKind::UnknownError) {
                ErrorKind::RegistrationFailed.into()
            } else {
                msg
            }
        });
        let result = self.finish(result);
        if let Ok(user) = &result {
            tracing::info!(user_id = %user.id, role = %user.role, "registered and signed in");
        }
        result
    }

    async fn create_account(&self, form: &RegistrationForm) -> Result<SessionUser, UserMessage> {
        let options = json_options(&RegistrationPayload::from_form(form)).map_err(gateway_message)?;
        let response = self
            .inner
            .gateway
            .public_request(REGISTER_PATH, options)
            .await
            .map_err(gateway_message)?;
        let auth: AuthResponse = decode(response).await.map_err(gateway_message)?;
        self.establish(auth).await
    }

    /// Post-acceptance steps shared by sign-in and registration.
    async fn establish(&self, auth: AuthResponse) -> Result<SessionUser, UserMessage> {
        let allowed = auth
            .user
            .role
            .parse::<Role>()
            .is_ok_and(|role| role.can_use_staff_portal());
        if !allowed {
            tracing::warn!(role = %auth.user.role, "sign-in refused for role outside the staff portal");
            return Err(ErrorKind::AccessDenied.into());
        }

        let profile = self
            .inner
            .gateway
            .fetch_profile_with(&auth.token)
            .await
            .map_err(gateway_message)?;
        let refresh = profile.refresh_token.clone().or(auth.refresh_token);
        let user = profile.into_session_user().map_err(profile_message)?;
        if !user.role.can_use_staff_portal() {
            return Err(ErrorKind::AccessDenied.into());
        }

        self.persist(StorageKey::Token, Some(&auth.token));
        self.persist(StorageKey::RefreshToken, refresh.as_deref());
        self.persist_user(&user);

        let now = Utc::now();
        let published = user.clone();
        self.update(move |s| {
            s.user = Some(published);
            s.access_token = Some(auth.token);
            s.refresh_token = refresh;
            s.validated = true;
            s.validated_at = Some(now);
            s.last_error = None;
        });
        Ok(user)
    }

    /// Re-fetch the profile and confirm the session.
    ///
    /// Concurrent callers share one in-flight execution and see its outcome.
    /// Only a session-expired failure clears the session; anything else keeps
    /// the current user and tokens and records `last_error`.
    pub async fn refresh(&self) -> Result<(), UserMessage> {
        let flight: RefreshFuture = {
            let mut slot = lock(&self.inner.in_flight);
            match slot.as_ref().and_then(WeakShared::upgrade) {
                Some(flight) => flight,
                None => {
                    let this = self.clone();
                    let flight = async move {
                        let result = this.run_refresh().await;
                        lock(&this.inner.in_flight).take();
                        result
                    }
                    .boxed()
                    .shared();
                    *slot = flight.downgrade();
                    flight
                }
            }
        };
        flight.await
    }

    async fn run_refresh(&self) -> Result<(), UserMessage> {
        let Some(started_with) = self.inner.store.get(StorageKey::Token) else {
            self.clear_session();
            return Ok(());
        };

        self.update(|s| s.is_loading = true);
        let result = self.fetch_profile().await;
        let access = self.inner.store.get(StorageKey::Token);
        let replaced = access.as_deref() != Some(started_with.as_str());
        match result {
            Ok(_) if access.is_none() => {
                // Signed out while the profile request was in flight.
                self.update(|s| {
                    s.clear_credentials();
                    s.is_loading = false;
                });
                Ok(())
            }
            Ok(_) if replaced => {
                tracing::debug!("discarding profile fetched for a replaced session");
                self.update(|s| s.is_loading = false);
                Ok(())
            }
            Ok(user) => {
                self.persist_user(&user);
                let refresh = self.inner.store.get(StorageKey::RefreshToken);
                let now = Utc::now();
                self.update(move |s| {
                    s.user = Some(user);
                    s.access_token = access;
                    s.refresh_token = refresh;
                    s.validated = true;
                    s.validated_at = Some(now);
                    s.last_error = None;
                    s.is_loading = false;
                });
                Ok(())
            }
            Err(msg) if replaced => {
                tracing::debug!(error = %msg, "ignoring refresh failure for a replaced session");
                self.update(|s| s.is_loading = false);
                Err(msg)
            }
            Err(msg) => {
                if msg.is_session_expired() {
                    tracing::info!("session expired; signing out");
                    self.clear_store();
                    self.update(|s| s.clear_credentials());
                }
                let text = msg.to_string();
                self.update(|s| {
                    s.last_error = Some(text);
                    s.is_loading = false;
                });
                Err(msg)
            }
        }
    }

    async fn fetch_profile(&self) -> Result<SessionUser, UserMessage> {
        let response = self
            .inner
            .gateway
            .request(PROFILE_PATH, RequestOptions::get())
            .await
            .map_err(gateway_message)?;
        let profile: ProfileResponse = decode(response).await.map_err(gateway_message)?;
        if let Some(rotated) = profile.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            self.persist(StorageKey::RefreshToken, Some(rotated));
        }
        profile.into_session_user().map_err(profile_message)
    }

    /// Forget the session locally. Never fails.
    pub fn logout(&self) {
        let user_id = self.inner.state.borrow().user.as_ref().map(|u| u.id.clone());
        self.clear_store();
        self.update(|s| {
            s.clear_credentials();
            s.is_loading = false;
            s.last_error = None;
        });
        if let Some(user_id) = user_id {
            tracing::info!(%user_id, "signed out");
        }
    }

    fn clear_session(&self) {
        self.clear_store();
        self.update(SessionState::clear_credentials);
    }

    fn clear_store(&self) {
        if let Err(err) = self.inner.store.clear() {
            tracing::error!("failed to clear credential store: {err}");
        }
    }

    fn persist(&self, key: StorageKey, value: Option<&str>) {
        let result = match value {
            Some(value) => self.inner.store.set(key, value),
            None => self.inner.store.remove(key),
        };
        if let Err(err) = result {
            tracing::error!(key = key.as_str(), "failed to persist credential: {err}");
        }
    }

    fn persist_user(&self, user: &SessionUser) {
        match user.to_snapshot() {
            Ok(snapshot) => self.persist(StorageKey::User, Some(&snapshot)),
            Err(err) => tracing::error!("failed to encode user snapshot: {err}"),
        }
    }

    /// Record a failed attempt without touching the session.
    fn reject(&self, msg: UserMessage) -> UserMessage {
        let text = msg.to_string();
        self.update(|s| s.last_error = Some(text));
        msg
    }

    fn finish(&self, result: Result<SessionUser, UserMessage>) -> Result<SessionUser, UserMessage> {
        let last_error = result.as_ref().err().map(ToString::to_string);
        self.update(|s| {
            s.is_loading = false;
            if last_error.is_some() {
                s.last_error = last_error;
            }
        });
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn json_options<T: Serialize>(body: &T) -> Result<RequestOptions, GatewayError> {
    let value = serde_json::to_value(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    Ok(RequestOptions::post(value))
}

fn gateway_message(err: GatewayError) -> UserMessage {
    classify(&RawFailure::from(err))
}

fn profile_message(err: DomainError) -> UserMessage {
    tracing::warn!(error = %err, "profile response rejected");
    match err {
        DomainError::InvalidRole(_) => ErrorKind::AccessDenied.into(),
        _ => ErrorKind::ServerError.into(),
    }
}
