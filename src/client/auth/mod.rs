//! Token lifecycle: storage, expiry, refresh.

pub mod expiry;
pub mod refresh;
pub mod store;
pub mod token_manager;

use crate::core::TokenPair;

/// Holds the access/refresh pair. Both halves are always written together.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self) -> Option<TokenPair>;
    async fn save(&self, pair: TokenPair) -> Result<(), store::Error>;
    async fn clear(&self) -> Result<(), store::Error>;

    async fn access_token(&self) -> Option<String> {
        self.load().await.map(|pair| pair.access_token)
    }

    async fn refresh_token(&self) -> Option<String> {
        self.load().await.map(|pair| pair.refresh_token)
    }
}

/// Exchanges a refresh token for a new pair.
#[async_trait::async_trait]
pub trait RefreshProvider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, Self::Error>;

    /// Whether `error` means the refresh token itself was turned down, as
    /// opposed to the exchange not getting through.
    fn is_rejection(_error: &Self::Error) -> bool {
        true
    }
}
