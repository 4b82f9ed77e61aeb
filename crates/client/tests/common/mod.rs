#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

use lendops_client::{ClientConfig, CredentialStore, SessionManager, StorageKey};

pub const ACCESS_TOKEN: &str = "access-1";
pub const REFRESH_TOKEN: &str = "refresh-1";

/// How the fake back office answers; tests mutate it between calls.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Role reported by sign-in, registration and the profile endpoint.
    pub role: String,
    /// Access token handed out by sign-in and registration.
    pub token: String,
    /// Bearer tokens the profile endpoint accepts.
    pub accepted: HashSet<String>,
    pub user_roles: Value,
    /// Refresh token the profile endpoint hands out, if any.
    pub rotated_refresh: Option<String>,
    pub profile_delay: Duration,
    pub profile_failure: Option<(StatusCode, Value)>,
    pub signin_failure: Option<(StatusCode, Value)>,
    pub register_failure: Option<(StatusCode, Value)>,
    /// How many more `/api/loans` calls answer 401 before succeeding.
    pub loans_unauthorized: usize,
    /// Status `/api/loans` answers once the 401s are used up.
    pub loans_failure: Option<StatusCode>,
}

impl Default for Behaviour {
    fn default() -> Self {
        Self {
            role: "staff".to_string(),
            token: ACCESS_TOKEN.to_string(),
            accepted: [ACCESS_TOKEN, REFRESH_TOKEN].into_iter().map(String::from).collect(),
            user_roles: json!({
                "r-officer": {
                    "name": "Loan Officer",
                    "permissions": [
                        { "_id": "p1", "name": "view_customers", "description": "" },
                        { "_id": "p2", "name": "create_loans", "description": "" }
                    ]
                }
            }),
            rotated_refresh: None,
            profile_delay: Duration::ZERO,
            profile_failure: None,
            signin_failure: None,
            register_failure: None,
            loans_unauthorized: 0,
            loans_failure: None,
        }
    }
}

#[derive(Default)]
pub struct Backend {
    pub behaviour: Mutex<Behaviour>,
    pub signin_calls: AtomicUsize,
    pub register_calls: AtomicUsize,
    pub profile_calls: AtomicUsize,
    pub loans_calls: AtomicUsize,
    pub last_register_body: Mutex<Option<Value>>,
}

impl Backend {
    pub fn configure(&self, f: impl FnOnce(&mut Behaviour)) {
        f(&mut self.behaviour.lock().unwrap());
    }

    fn snapshot(&self) -> Behaviour {
        self.behaviour.lock().unwrap().clone()
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn loans_calls(&self) -> usize {
        self.loans_calls.load(Ordering::SeqCst)
    }

    pub fn signin_calls(&self) -> usize {
        self.signin_calls.load(Ordering::SeqCst)
    }

    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }
}

/// Shaped like a document-store user: both `_id` and its `id` virtual.
fn user_json(role: &str) -> Value {
    json!({
        "_id": "u-100",
        "id": "u-100",
        "email": "ada@bank.test",
        "firstName": "Ada",
        "lastName": "Obi",
        "role": role,
        "department": "Credit"
    })
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

fn auth_body(behaviour: &Behaviour, role: &str) -> Value {
    json!({ "user": user_json(role), "token": behaviour.token, "refreshToken": REFRESH_TOKEN })
}

async fn signin(State(backend): State<Arc<Backend>>) -> Response {
    backend.signin_calls.fetch_add(1, Ordering::SeqCst);
    let behaviour = backend.snapshot();
    match behaviour.signin_failure.clone() {
        Some((status, body)) => (status, Json(body)).into_response(),
        None => Json(auth_body(&behaviour, &behaviour.role)).into_response(),
    }
}

async fn register(State(backend): State<Arc<Backend>>, Json(body): Json<Value>) -> Response {
    backend.register_calls.fetch_add(1, Ordering::SeqCst);
    let role = body["role"].as_str().unwrap_or_default().to_string();
    *backend.last_register_body.lock().unwrap() = Some(body);
    let behaviour = backend.snapshot();
    match behaviour.register_failure.clone() {
        Some((status, body)) => (status, Json(body)).into_response(),
        None => Json(auth_body(&behaviour, &role)).into_response(),
    }
}

async fn me(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    backend.profile_calls.fetch_add(1, Ordering::SeqCst);
    let behaviour = backend.snapshot();
    if !behaviour.profile_delay.is_zero() {
        tokio::time::sleep(behaviour.profile_delay).await;
    }
    if let Some((status, body)) = behaviour.profile_failure {
        return (status, Json(body)).into_response();
    }
    let authorized = bearer(&headers).is_some_and(|t| behaviour.accepted.contains(&t));
    if !authorized {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "Invalid token" }))).into_response();
    }
    let mut body = json!({ "user": user_json(&behaviour.role), "userRoles": behaviour.user_roles });
    if let Some(rotated) = behaviour.rotated_refresh {
        body["refreshToken"] = Value::String(rotated);
    }
    Json(body).into_response()
}

async fn loans(State(backend): State<Arc<Backend>>) -> Response {
    backend.loans_calls.fetch_add(1, Ordering::SeqCst);
    let mut behaviour = backend.behaviour.lock().unwrap();
    if behaviour.loans_unauthorized > 0 {
        behaviour.loans_unauthorized -= 1;
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if let Some(status) = behaviour.loans_failure {
        return (status, Json(json!({ "message": "ledger unavailable" }))).into_response();
    }
    Json(json!({ "loans": [{ "id": "L-1", "amount": 250000 }] })).into_response()
}

async fn echo(headers: HeaderMap) -> Json<Value> {
    let value = |name: header::HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    Json(json!({
        "authorization": value(header::AUTHORIZATION),
        "contentType": value(header::CONTENT_TYPE),
        "requestId": value(header::HeaderName::from_static("x-request-id")),
    }))
}

async fn rejected_amount() -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(json!({ "message": "amount exceeds product limit" })),
    )
        .into_response()
}

async fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "nope").into_response()
}

pub struct TestServer {
    pub base_url: String,
    pub backend: Arc<Backend>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        lendops_observability::init_for_tests();

        let backend = Arc::new(Backend::default());
        let app = Router::new()
            .route("/api/users/signin", post(signin))
            .route("/api/users/create", post(register))
            .route("/api/users/me", get(me))
            .route("/api/loans", get(loans))
            .route("/api/echo", get(echo).post(echo))
            .route("/api/disbursements", post(rejected_amount))
            .route("/api/reports", get(forbidden))
            .with_state(Arc::clone(&backend));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            backend,
            handle,
        }
    }

    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(&self.base_url)
            .unwrap()
            .with_request_timeout(Duration::from_secs(5))
            .with_auth_retry_backoff(Duration::from_millis(10))
    }

    pub fn manager(&self, store: Arc<dyn CredentialStore>) -> SessionManager {
        SessionManager::new(self.config(), store).unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An origin nothing listens on: connections are refused.
pub async fn unreachable_config() -> ClientConfig {
    lendops_observability::init_for_tests();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    ClientConfig::new(format!("http://{}", addr))
        .unwrap()
        .with_request_timeout(Duration::from_secs(5))
}

/// Store pre-populated with a previously signed-in staff session.
pub fn seed_session(store: &dyn CredentialStore, access: &str) {
    let user = json!({
        "id": "u-100",
        "email": "ada@bank.test",
        "fullName": "Ada Obi",
        "role": "staff",
        "permissions": ["view_customers"],
        "roleName": "Loan Officer"
    });
    store.set(StorageKey::Token, access).unwrap();
    store.set(StorageKey::RefreshToken, REFRESH_TOKEN).unwrap();
    store.set(StorageKey::User, &user.to_string()).unwrap();
}
