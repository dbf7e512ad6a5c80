use super::auth::store;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 401 that wasn't recovered: from an auth endpoint, or from the retry.
    #[error("{detail}")]
    Unauthorized { detail: String },
    /// Refresh failed; tokens are cleared and the session handler was notified.
    #[error("Session expired. Please log in again.")]
    SessionExpired,
    #[error("reqwest: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{detail}")]
    Server { status: u16, detail: String },
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("query: {0}")]
    Query(#[from] serde_urlencoded::ser::Error),
    #[error("token store: {0}")]
    Store(#[from] store::Error),
    #[error("access token is not a valid header value")]
    InvalidToken,
    #[error("client build: {0}")]
    Build(String),
}

impl Error {
    /// HTTP status behind the error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Unauthorized { .. } => Some(401),
            Error::Server { status, .. } => Some(*status),
            Error::Network(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::SessionExpired)
    }
}

impl From<super::utils::ServerError> for Error {
    fn from(err: super::utils::ServerError) -> Self {
        let super::utils::ServerError {
            status_code,
            detail,
        } = err;
        Error::Server {
            status: status_code,
            detail,
        }
    }
}
