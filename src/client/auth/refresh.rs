//! Refresh the pair against `/auth/refresh`.

use crate::client::utils::{check_status, ServerError};
use crate::core::{AuthTokens, RefreshRequest, TokenPair};

pub const REFRESH_ENDPOINT: &str = "/auth/refresh";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("reqwest: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("server: {0}")]
    Server(#[from] ServerError),
}

pub struct RefreshExchange {
    pub client: reqwest::Client,
    /// Full URL of the refresh endpoint.
    pub url: String,
}

impl RefreshExchange {
    /// Perform the exchange.
    pub async fn perform(&self, refresh_token: &str) -> Result<AuthTokens, Error> {
        let req = self
            .client
            .post(&self.url)
            .json(&RefreshRequest { refresh_token })
            .build()?;

        let res = self.client.execute(req).await?;
        let res = check_status(res).await?;
        let tokens = res.json().await?;
        Ok(tokens)
    }
}

#[async_trait::async_trait]
impl super::RefreshProvider for RefreshExchange {
    type Error = Error;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Self::Error> {
        let tokens = self.perform(refresh_token).await?;
        Ok(tokens.into())
    }

    fn is_rejection(error: &Self::Error) -> bool {
        match error {
            Error::Server(ServerError { status_code, .. }) => (400..500).contains(status_code),
            Error::Reqwest(_) => false,
        }
    }
}
