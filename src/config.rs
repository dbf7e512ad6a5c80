//! Client configuration.

use std::{path::PathBuf, time::Duration};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth/login";
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("env var {var} has an invalid value {value:?}")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Origin of the backend, e.g. `https://api.example.com`.
    pub base_url: String,
    /// Versioned prefix appended to the origin.
    pub api_prefix: String,
    /// Route handed to the session handler when the session can't be recovered.
    pub login_route: String,
    /// Refresh ahead of time when the access token expires within this window.
    /// `None` disables the proactive check; 401 responses still trigger a refresh.
    pub refresh_threshold: Option<Duration>,
    pub request_timeout: Option<Duration>,
    pub token_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            api_prefix: DEFAULT_API_PREFIX.to_owned(),
            login_route: DEFAULT_LOGIN_ROUTE.to_owned(),
            refresh_threshold: Some(DEFAULT_REFRESH_THRESHOLD),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            token_file: None,
        }
    }
}

impl Config {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        if let Some(base_url) = lookup("API_URL") {
            config.base_url = base_url;
        }
        if let Some(api_prefix) = lookup("AGENTDESK_API_PREFIX") {
            config.api_prefix = api_prefix;
        }
        if let Some(secs) = parse_secs(&lookup, "AGENTDESK_REFRESH_THRESHOLD_SECS")? {
            config.refresh_threshold = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "AGENTDESK_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = secs;
        }
        if let Some(path) = lookup("AGENTDESK_TOKEN_FILE") {
            config.token_file = Some(path.into());
        }

        Ok(config)
    }

    /// Origin plus versioned prefix, without a trailing slash.
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.api_prefix.trim_end_matches('/');
        if prefix.is_empty() || prefix.starts_with('/') {
            format!("{}{}", base, prefix)
        } else {
            format!("{}/{}", base, prefix)
        }
    }

    pub fn endpoint_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.api_root(), endpoint)
        } else {
            format!("{}/{}", self.api_root(), endpoint)
        }
    }
}

/// `Some(None)` means the variable was set to zero, which disables the setting.
fn parse_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<Option<Duration>>, Error> {
    let value = match lookup(var) {
        Some(value) => value,
        None => return Ok(None),
    };
    let secs: u64 = value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidNumber { var, value })?;
    if secs == 0 {
        return Ok(Some(None));
    }
    Ok(Some(Some(Duration::from_secs(secs))))
}
