//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:5000";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_AUTH_RETRY_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("API base URL must start with http:// or https://: {0:?}")]
    InvalidBaseUrl(String),
}

/// Settings for the back office client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Back office origin, without a trailing slash.
    pub api_base_url: String,
    /// Upper bound on a single HTTP exchange.
    pub request_timeout: Duration,
    /// Pause before the one extra attempt made by `with_auth_retry`.
    pub auth_retry_backoff: Duration,
    /// Where the file credential store lives; `None` uses the OS data directory.
    pub session_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auth_retry_backoff: DEFAULT_AUTH_RETRY_BACKOFF,
            session_file: None,
        }
    }
}

impl ClientConfig {
    pub fn new(api_base_url: impl Into<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            api_base_url: normalize_base_url(api_base_url.into())?,
            ..Self::default()
        })
    }

    /// Read configuration from `LENDOPS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup("LENDOPS_API_URL") {
            Some(url) => config.api_base_url = normalize_base_url(url)?,
            None => tracing::warn!("LENDOPS_API_URL not set; using {DEFAULT_API_URL}"),
        }

        if let Some(raw) = lookup("LENDOPS_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(parse_u64("LENDOPS_REQUEST_TIMEOUT_SECS", &raw)?);
        }

        if let Some(raw) = lookup("LENDOPS_AUTH_RETRY_BACKOFF_MS") {
            config.auth_retry_backoff =
                Duration::from_millis(parse_u64("LENDOPS_AUTH_RETRY_BACKOFF_MS", &raw)?);
        }

        config.session_file = lookup("LENDOPS_SESSION_FILE")
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_auth_retry_backoff(mut self, backoff: Duration) -> Self {
        self.auth_retry_backoff = backoff;
        self
    }

    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Absolute URL for an API path such as `/api/users/me`.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if endpoint.starts_with('/') {
            format!("{}{}", self.api_base_url, endpoint)
        } else {
            format!("{}/{}", self.api_base_url, endpoint)
        }
    }
}

fn normalize_base_url(url: String) -> Result<String, ConfigError> {
    let trimmed = url.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(ConfigError::InvalidBaseUrl(url));
    }
    Ok(trimmed.to_string())
}

fn parse_u64(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: raw.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("LENDOPS_API_URL", "https://backoffice.bank.test/"),
            ("LENDOPS_REQUEST_TIMEOUT_SECS", "5"),
            ("LENDOPS_AUTH_RETRY_BACKOFF_MS", "250"),
            ("LENDOPS_SESSION_FILE", "/tmp/lendops/session.json"),
        ]))
        .unwrap();

        assert_eq!(config.api_base_url, "https://backoffice.bank.test");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.auth_retry_backoff, Duration::from_millis(250));
        assert_eq!(config.session_file, Some(PathBuf::from("/tmp/lendops/session.json")));
    }

    #[test]
    fn rejects_bad_values() {
        assert_eq!(
            ClientConfig::from_lookup(lookup(&[("LENDOPS_REQUEST_TIMEOUT_SECS", "soon")])).unwrap_err(),
            ConfigError::InvalidValue {
                var: "LENDOPS_REQUEST_TIMEOUT_SECS",
                value: "soon".to_string()
            }
        );
        assert!(matches!(
            ClientConfig::from_lookup(lookup(&[("LENDOPS_API_URL", "backoffice")])),
            Err(ConfigError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn endpoint_urls() {
        let config = ClientConfig::new("http://127.0.0.1:9000/").unwrap();
        assert_eq!(config.endpoint_url("/api/users/me"), "http://127.0.0.1:9000/api/users/me");
        assert_eq!(config.endpoint_url("api/fees"), "http://127.0.0.1:9000/api/fees");
        assert_eq!(config.endpoint_url("https://other.test/x"), "https://other.test/x");
    }
}
