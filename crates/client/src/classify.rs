//! Reduction of arbitrary failures to bounded, user-facing messages.
//!
//! Classification runs in two stages:
//!
//! - **Extraction** decodes the failure into a plain string by trying each known
//!   shape in order (text, network failure, `message` / `error` / `msg` fields,
//!   the same fields under `response.data`). Nothing recognisable → unknown.
//! - **Translation** lower-cases that string and matches it against keyword
//!   sets in a fixed priority order. The first matching set decides the
//!   category. Unmatched text is passed through with its first letter
//!   capitalised, so backend detail the keyword sets don't cover still reaches
//!   the user.

use serde_json::Value;
use thiserror::Error;

/// Closed set of user-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NetworkError,
    InvalidCredentials,
    UserNotFound,
    AccountLocked,
    AccessDenied,
    InvalidRole,
    RegistrationFailed,
    EmailExists,
    StaffIdExists,
    WeakPassword,
    PasswordMismatch,
    InvalidEmail,
    SessionExpired,
    ServerError,
    UnknownError,
}

impl ErrorKind {
    /// The one sentence shown to users for this category.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorKind::NetworkError => {
                "Unable to connect to the server. Please check your internet connection and try again."
            }
            ErrorKind::InvalidCredentials => {
                "Invalid email or password. Please check your credentials and try again."
            }
            ErrorKind::UserNotFound => "No account found with this email address.",
            ErrorKind::AccountLocked => {
                "Your account has been locked. Please contact an administrator."
            }
            ErrorKind::AccessDenied => {
                "Access denied. You do not have permission to access this portal."
            }
            ErrorKind::InvalidRole => {
                "Invalid role selected. Only admin and staff roles are allowed."
            }
            ErrorKind::RegistrationFailed => {
                "Registration failed. Please check your details and try again."
            }
            ErrorKind::EmailExists => "An account with this email address already exists.",
            ErrorKind::StaffIdExists => "This staff ID is already registered.",
            ErrorKind::WeakPassword => "Password must be at least 8 characters long.",
            ErrorKind::PasswordMismatch => "Passwords do not match.",
            ErrorKind::InvalidEmail => "Please enter a valid email address.",
            ErrorKind::SessionExpired => "Your session has expired. Please sign in again.",
            ErrorKind::ServerError => "A server error occurred. Please try again later.",
            ErrorKind::UnknownError => "An unexpected error occurred. Please try again.",
        }
    }
}

/// A failure as shown to the user: a known category or passed-through detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserMessage {
    #[error("{}", .0.message())]
    Known(ErrorKind),

    /// Backend text no keyword set recognised, first letter capitalised.
    #[error("{0}")]
    Detail(String),
}

impl UserMessage {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            UserMessage::Known(kind) => Some(*kind),
            UserMessage::Detail(_) => None,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == Some(kind)
    }

    pub fn is_session_expired(&self) -> bool {
        self.is(ErrorKind::SessionExpired)
    }
}

impl From<ErrorKind> for UserMessage {
    fn from(kind: ErrorKind) -> Self {
        UserMessage::Known(kind)
    }
}

/// The failure shapes the classifier knows how to decode.
#[derive(Debug, Clone, PartialEq)]
pub enum RawFailure {
    /// A bare message string.
    Text(String),
    /// A transport-level exception. `network` marks connect/timeout/request
    /// failures where the server was never reached.
    Transport { network: bool, message: String },
    /// A decoded response body of arbitrary shape.
    Body(Value),
}

impl RawFailure {
    pub fn text(message: impl Into<String>) -> Self {
        RawFailure::Text(message.into())
    }
}

impl From<reqwest::Error> for RawFailure {
    fn from(err: reqwest::Error) -> Self {
        RawFailure::Transport {
            network: err.is_connect() || err.is_timeout() || err.is_request(),
            message: err.to_string(),
        }
    }
}

impl From<Value> for RawFailure {
    fn from(body: Value) -> Self {
        RawFailure::Body(body)
    }
}

/// Result of the extraction stage.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Extracted {
    Message(String),
    Network,
    Unknown,
}

const MESSAGE_FIELDS: [&str; 3] = ["message", "error", "msg"];

fn message_field(object: &serde_json::Map<String, Value>) -> Option<String> {
    MESSAGE_FIELDS.iter().find_map(|field| match object.get(*field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

fn extract_body(body: &Value) -> Extracted {
    match body {
        Value::String(s) => Extracted::Message(s.trim().to_string()),
        Value::Object(object) => {
            if let Some(message) = message_field(object) {
                return Extracted::Message(message);
            }
            // Transport adapters wrap the real payload as `response.data`.
            match object.get("response").and_then(|r| r.get("data")) {
                Some(Value::String(s)) => Extracted::Message(s.trim().to_string()),
                Some(Value::Object(inner)) => message_field(inner)
                    .map(Extracted::Message)
                    .unwrap_or(Extracted::Unknown),
                _ => Extracted::Unknown,
            }
        }
        _ => Extracted::Unknown,
    }
}

fn extract(raw: &RawFailure) -> Extracted {
    match raw {
        RawFailure::Text(s) => Extracted::Message(s.trim().to_string()),
        RawFailure::Transport { network: true, .. } => Extracted::Network,
        RawFailure::Transport { network: false, message } => {
            let lower = message.to_lowercase();
            if lower.contains("fetch") || lower.contains("network") {
                Extracted::Network
            } else {
                Extracted::Message(message.trim().to_string())
            }
        }
        RawFailure::Body(body) => extract_body(body),
    }
}

/// Keyword sets in priority order; the first set with a matching keyword wins.
const KEYWORDS: &[(ErrorKind, &[&str])] = &[
    (
        ErrorKind::InvalidCredentials,
        &[
            "invalid credentials",
            "invalid email or password",
            "incorrect email or password",
            "incorrect password",
            "wrong password",
            "invalid password",
        ],
    ),
    (
        ErrorKind::UserNotFound,
        &[
            "user not found",
            "no user found",
            "user does not exist",
            "account not found",
            "no account found",
        ],
    ),
    (
        ErrorKind::AccountLocked,
        &["locked", "suspended", "deactivated", "disabled", "too many attempts"],
    ),
    (
        ErrorKind::AccessDenied,
        &[
            "access denied",
            "forbidden",
            "not authorized",
            "permission denied",
            "not allowed",
        ],
    ),
    (
        ErrorKind::EmailExists,
        &[
            "email already exists",
            "email address already exists",
            "email already in use",
            "email already registered",
            "email is already",
            "duplicate email",
        ],
    ),
    (
        ErrorKind::StaffIdExists,
        &[
            "staff id already exists",
            "staffid already exists",
            "staff id is already",
            "staff id already in use",
            "duplicate staff",
        ],
    ),
    (
        ErrorKind::WeakPassword,
        &[
            "password must be at least",
            "password too short",
            "password is too short",
            "weak password",
            "password is too weak",
        ],
    ),
    (
        ErrorKind::PasswordMismatch,
        &["passwords do not match", "passwords don't match", "password mismatch"],
    ),
    (
        ErrorKind::InvalidEmail,
        &["invalid email", "email is invalid", "valid email"],
    ),
    (
        ErrorKind::SessionExpired,
        &[
            "session expired",
            "session has expired",
            "token expired",
            "jwt expired",
            "invalid token",
            "unauthorized",
            "please login again",
            "please log in again",
        ],
    ),
    (
        ErrorKind::InvalidRole,
        &["invalid role", "role not allowed", "unsupported role"],
    ),
    (
        ErrorKind::ServerError,
        &[
            "internal server error",
            "server error",
            "service unavailable",
            "bad gateway",
        ],
    ),
    (
        ErrorKind::NetworkError,
        &[
            "network",
            "failed to fetch",
            "unable to connect",
            "connection refused",
            "timed out",
            "timeout",
        ],
    ),
    (ErrorKind::RegistrationFailed, &["registration failed"]),
];

fn translate(message: &str) -> UserMessage {
    let lower = message.to_lowercase();

    for (kind, keywords) in KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return UserMessage::Known(*kind);
        }
    }

    if message.is_empty() || message == ErrorKind::UnknownError.message() {
        return UserMessage::Known(ErrorKind::UnknownError);
    }

    UserMessage::Detail(capitalize_first(message))
}

fn capitalize_first(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Reduce any failure to a user-facing message.
pub fn classify(raw: &RawFailure) -> UserMessage {
    match extract(raw) {
        Extracted::Network => UserMessage::Known(ErrorKind::NetworkError),
        Extracted::Unknown => UserMessage::Known(ErrorKind::UnknownError),
        Extracted::Message(message) => translate(&message),
    }
}
