use serde::{Deserialize, Serialize};
use tracing::warn;

/// The access/refresh pair as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Body returned by login, register and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

impl From<AuthTokens> for TokenPair {
    fn from(tokens: AuthTokens) -> Self {
        let AuthTokens {
            access_token,
            refresh_token,
            ..
        } = tokens;
        Self {
            access_token,
            refresh_token,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Registration {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Profile returned by `/auth/me`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
    /// Everything else the backend sends (tenant, plan, timestamps...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Payload-less response, deserializes from `{}` and from 204s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Invoked once the session can't be recovered and the tokens are gone.
///
/// A UI would navigate to `login_route`; a CLI prints a hint.
pub trait SessionHandler: Send + Sync {
    fn session_expired(&self, login_route: &str);
}

pub struct LogSessionHandler;

impl SessionHandler for LogSessionHandler {
    fn session_expired(&self, login_route: &str) {
        warn!(message = "Session expired, login required", login_route);
    }
}
