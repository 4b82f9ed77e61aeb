//! Authenticated request gateway for the back office API.
//!
//! Every call re-reads the access token from the credential store, so tokens
//! written by another process (or another session handle) are picked up
//! immediately.
//!
//! On a 401, and only when both a refresh token and a stored user exist, the
//! gateway re-validates once against the profile endpoint using the refresh
//! token, then retries the original request once with the original access
//! token. There is no loop: any non-2xx answer to the retry is reported as an
//! expired session.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use lendops_auth::SessionUser;

use crate::classify::{ErrorKind, RawFailure, classify};
use crate::config::ClientConfig;
use crate::store::{CredentialStore, StorageKey};
use crate::wire::{PROFILE_PATH, ProfileResponse};

pub const NOT_FOUND_MESSAGE: &str = "The requested resource was not found.";

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// The server was never reached (connect failure, timeout).
    #[error("network error: {0}")]
    Network(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// Non-2xx response with a JSON body, left untranslated.
    #[error("API error ({status}): {body}")]
    Api { status: u16, body: Value },

    /// Non-2xx response without a JSON body; message synthesized from the status.
    #[error("{message}")]
    Status { status: u16, message: String },

    /// Re-validation failed, or the retried request did not succeed.
    #[error("session expired")]
    SessionExpired,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } | GatewayError::Status { status, .. } => Some(*status),
            GatewayError::SessionExpired => Some(StatusCode::UNAUTHORIZED.as_u16()),
            _ => None,
        }
    }

    /// Session, token or 401 related; the only errors `with_auth_retry` retries.
    pub fn is_auth_related(&self) -> bool {
        if self.status() == Some(StatusCode::UNAUTHORIZED.as_u16()) {
            return true;
        }
        if classify(&RawFailure::from(self.clone())).is_session_expired() {
            return true;
        }
        let text = match self {
            GatewayError::Api { body, .. } => body.to_string(),
            other => other.to_string(),
        }
        .to_lowercase();
        text.contains("token") || text.contains("session")
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else if err.is_connect() || err.is_timeout() || err.is_request() {
            GatewayError::Network(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

impl From<GatewayError> for RawFailure {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Network(message) => RawFailure::Transport {
                network: true,
                message,
            },
            GatewayError::Transport(message) => RawFailure::Transport {
                network: false,
                message,
            },
            GatewayError::Api { body, .. } => RawFailure::Body(body),
            GatewayError::Status { message, .. } => RawFailure::Text(message),
            GatewayError::SessionExpired => RawFailure::text(ErrorKind::SessionExpired.message()),
            GatewayError::InvalidRequest(message) => RawFailure::Text(message),
            GatewayError::Decode(_) => RawFailure::text(ErrorKind::ServerError.message()),
        }
    }
}

/// Message for a non-2xx response whose body is not JSON.
pub fn status_message(status: StatusCode) -> String {
    match status {
        StatusCode::UNAUTHORIZED => ErrorKind::SessionExpired.message().to_string(),
        StatusCode::FORBIDDEN => ErrorKind::AccessDenied.message().to_string(),
        StatusCode::NOT_FOUND => NOT_FOUND_MESSAGE.to_string(),
        _ => ErrorKind::ServerError.message().to_string(),
    }
}

/// Method, extra headers and JSON body of a gateway call.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            method: Method::PUT,
            body: Some(body),
            ..Self::default()
        }
    }

    pub fn delete() -> Self {
        Self {
            method: Method::DELETE,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// JSON content type, then caller headers on top, then the bearer credential.
///
/// The Authorization header always reflects `token`, whatever the caller passed.
pub fn build_headers(caller: &HeaderMap, token: Option<&str>) -> Result<HeaderMap, GatewayError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for (name, value) in caller {
        headers.insert(name.clone(), value.clone());
    }
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| GatewayError::InvalidRequest("access token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, value);
    }
    Ok(headers)
}

/// Run `op`, and once more after `backoff` if it failed for an auth-related reason.
///
/// Absorbs races between start-up and token rotation; never applied to other
/// failures.
pub async fn with_auth_retry<T, F, Fut>(backoff: Duration, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    match op().await {
        Err(err) if err.is_auth_related() => {
            tracing::debug!(error = %err, ?backoff, "auth-related failure; retrying once");
            tokio::time::sleep(backoff).await;
            op().await
        }
        other => other,
    }
}

/// HTTP gateway bound to one API origin and one credential store.
#[derive(Clone)]
pub struct ApiGateway {
    http: reqwest::Client,
    config: ClientConfig,
    store: Arc<dyn CredentialStore>,
}

impl core::fmt::Debug for ApiGateway {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ApiGateway")
            .field("api_base_url", &self.config.api_base_url)
            .finish()
    }
}

impl ApiGateway {
    pub fn new(config: ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { http, config, store })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    async fn send(
        &self,
        endpoint: &str,
        options: &RequestOptions,
        token: Option<&str>,
    ) -> Result<Response, GatewayError> {
        let url = self.config.endpoint_url(endpoint);
        let headers = build_headers(&options.headers, token)?;
        let mut req = self.http.request(options.method.clone(), &url).headers(headers);
        if let Some(body) = &options.body {
            let bytes = serde_json::to_vec(body).map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
            req = req.body(bytes);
        }
        tracing::debug!(method = %options.method, %url, authenticated = token.is_some(), "sending request");
        Ok(req.send().await?)
    }

    /// Pass 2xx through; turn anything else into `Api` (JSON body) or `Status`.
    async fn check(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let bytes = response.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(body) => Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            }),
            Err(_) => Err(GatewayError::Status {
                status: status.as_u16(),
                message: status_message(status),
            }),
        }
    }

    /// Authenticated call with one transparent re-validation on 401.
    pub async fn request(&self, endpoint: &str, options: RequestOptions) -> Result<Response, GatewayError> {
        let access = self.store.get(StorageKey::Token);
        let response = self.send(endpoint, &options, access.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Self::check(response).await;
        }

        let refresh = self.store.get(StorageKey::RefreshToken);
        let has_user = self.store.get(StorageKey::User).is_some();
        let Some(refresh) = refresh.filter(|_| has_user) else {
            return Self::check(response).await;
        };

        tracing::debug!(endpoint, "access token rejected; re-validating with refresh token");
        if let Err(err) = self.revalidate(&refresh).await {
            tracing::warn!(endpoint, error = %err, "re-validation failed");
            return Err(GatewayError::SessionExpired);
        }

        let retried = self.send(endpoint, &options, access.as_deref()).await?;
        if !retried.status().is_success() {
            tracing::warn!(endpoint, status = %retried.status(), "retried request failed after re-validation");
            return Err(GatewayError::SessionExpired);
        }
        Ok(retried)
    }

    /// `request` wrapped in [`with_auth_retry`] using the configured backoff.
    pub async fn request_with_retry(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Response, GatewayError> {
        with_auth_retry(self.config.auth_retry_backoff, || {
            self.request(endpoint, options.clone())
        })
        .await
    }

    /// Call without credentials or re-validation (sign-in, registration).
    pub async fn public_request(&self, endpoint: &str, options: RequestOptions) -> Result<Response, GatewayError> {
        let response = self.send(endpoint, &options, None).await?;
        Self::check(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, GatewayError> {
        let response = self.request(endpoint, RequestOptions::get()).await?;
        decode(response).await
    }

    /// Fetch the profile with an explicit bearer credential.
    pub async fn fetch_profile_with(&self, token: &str) -> Result<ProfileResponse, GatewayError> {
        let response = self.send(PROFILE_PATH, &RequestOptions::get(), Some(token)).await?;
        decode(Self::check(response).await?).await
    }

    /// Confirm the session with the refresh token and persist what came back.
    async fn revalidate(&self, refresh_token: &str) -> Result<SessionUser, GatewayError> {
        let profile = self.fetch_profile_with(refresh_token).await?;
        let rotated = profile.refresh_token.clone();
        let user = profile
            .into_session_user()
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        match user.to_snapshot() {
            Ok(snapshot) => {
                if let Err(err) = self.store.set(StorageKey::User, &snapshot) {
                    tracing::error!("failed to persist re-validated user: {err}");
                }
            }
            Err(err) => tracing::error!("failed to encode re-validated user: {err}"),
        }
        if let Some(rotated) = rotated.filter(|t| !t.is_empty()) {
            if let Err(err) = self.store.set(StorageKey::RefreshToken, &rotated) {
                tracing::error!("failed to persist rotated refresh token: {err}");
            }
        }
        Ok(user)
    }
}

/// Decode a successful JSON response.
pub async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::Decode(e.to_string()))
}
