use std::{
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{expiry, RefreshProvider, TokenStore};
use crate::core::TokenPair;

/// One refresh exchange, awaited by everyone who asked while it ran.
type PendingRefresh = Shared<BoxFuture<'static, Option<String>>>;

/// Single-flight refresh of the stored token pair.
pub struct TokenManager<Provider>
where
    Provider: RefreshProvider,
{
    provider: Arc<Provider>,
    store: Arc<dyn TokenStore>,
    in_flight: Arc<Mutex<Option<PendingRefresh>>>,
    last_issued: Arc<Mutex<Option<Issued>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error<RefreshError> {
    #[error("no refresh token stored")]
    MissingRefreshToken,
    #[error("token provider: {0}")]
    Provider(#[source] RefreshError),
}

/// Access token handed out by the last successful exchange.
#[derive(Debug, Clone)]
struct Issued {
    access_token: String,
    at: SystemTime,
}

enum Trigger<'a> {
    Always,
    /// The server rejected this token; skip the exchange if the store moved on.
    Rejected(Option<&'a str>),
    /// This token is about to expire but still works.
    Ahead(&'a str),
}

/// What a failed exchange does to the stored pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    Clear,
    /// Keep the pair unless the refresh token itself was turned down.
    ClearIfRejected,
}

impl<Provider> TokenManager<Provider>
where
    Provider: RefreshProvider + 'static,
{
    pub fn new(provider: Provider, store: Arc<dyn TokenStore>) -> Self {
        Self {
            provider: Arc::new(provider),
            store,
            in_flight: Arc::new(Mutex::const_new(None)),
            last_issued: Arc::new(Mutex::const_new(None)),
        }
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub async fn is_refreshing(&self) -> bool {
        self.in_flight.lock().await.is_some()
    }

    /// Refresh the pair, or join the refresh already running.
    ///
    /// `None` means the session is gone: the exchange failed and the store
    /// has been cleared.
    pub async fn refresh(&self) -> Option<String> {
        self.acquire(Trigger::Always).await
    }

    /// Like [`refresh`](Self::refresh), for a request that was answered 401
    /// while carrying `rejected`.
    pub async fn refresh_stale(&self, rejected: Option<&str>) -> Option<String> {
        self.acquire(Trigger::Rejected(rejected)).await
    }

    /// Access token to send now, refreshed first if it expires within `threshold`.
    ///
    /// The window never exceeds half of the token's lifetime, when that is
    /// known from `iat` or from the exchange that issued it. If refreshing
    /// ahead of time fails, the held token is returned and the server gets
    /// to decide. Without a stored pair there is nothing to send.
    pub async fn fresh_token(&self, threshold: Duration) -> Option<String> {
        let token = self.store.load().await?.access_token;

        let threshold = match self.window_for(&token, threshold).await {
            Some(threshold) => threshold,
            None => {
                debug!(message = "Using just issued token");
                return Some(token);
            }
        };

        if !expiry::expires_within(Some(&token), threshold, SystemTime::now()) {
            debug!(message = "Using preexisting token");
            return Some(token);
        }

        debug!(message = "Access token expiring soon, refreshing ahead of time");
        match self.acquire(Trigger::Ahead(&token)).await {
            Some(new_token) => Some(new_token),
            None => {
                warn!(message = "Refresh ahead of expiry failed, sending the held token");
                Some(token)
            }
        }
    }

    /// Expiry window for `token`; `None` when it can't be judged and was
    /// issued by the last exchange.
    async fn window_for(&self, token: &str, threshold: Duration) -> Option<Duration> {
        let issued_here = self
            .last_issued
            .lock()
            .await
            .as_ref()
            .filter(|issued| issued.access_token == token)
            .and_then(|issued| issued.at.duration_since(UNIX_EPOCH).ok())
            .map(|at| at.as_secs_f64());

        let exp = match expiry::expires_at(token) {
            Some(exp) => exp,
            None if issued_here.is_some() => return None,
            None => return Some(threshold),
        };

        let window = match expiry::issued_at(token).or(issued_here) {
            Some(iat) if exp > iat => Duration::try_from_secs_f64((exp - iat) / 2.0)
                .map_or(threshold, |half| threshold.min(half)),
            _ => threshold,
        };
        Some(window)
    }

    async fn acquire(&self, trigger: Trigger<'_>) -> Option<String> {
        let pending = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(pending) = &*in_flight {
                debug!(message = "Refresh already in flight, waiting for it");
                pending.clone()
            } else {
                let (seen, on_failure) = match trigger {
                    Trigger::Always => (None, OnFailure::Clear),
                    Trigger::Rejected(rejected) => (Some(rejected), OnFailure::Clear),
                    Trigger::Ahead(held) => (Some(Some(held)), OnFailure::ClearIfRejected),
                };
                if let Some(seen) = seen {
                    if let Some(current) = self.store.access_token().await {
                        if seen != Some(current.as_str()) {
                            debug!(message = "Token already rotated, reusing it");
                            return Some(current);
                        }
                    }
                }

                info!(message = "About to refresh the access token");
                let pending = Self::exchange(
                    Arc::clone(&self.provider),
                    Arc::clone(&self.store),
                    Arc::clone(&self.in_flight),
                    Arc::clone(&self.last_issued),
                    on_failure,
                )
                .boxed()
                .shared();
                in_flight.replace(pending.clone());
                pending
            }
        };

        pending.await
    }

    async fn fetch_new_pair(
        provider: &Provider,
        store: &dyn TokenStore,
    ) -> Result<TokenPair, Error<Provider::Error>> {
        let refresh_token = store
            .refresh_token()
            .await
            .ok_or(Error::MissingRefreshToken)?;
        provider
            .refresh(&refresh_token)
            .await
            .map_err(Error::Provider)
    }

    async fn exchange(
        provider: Arc<Provider>,
        store: Arc<dyn TokenStore>,
        in_flight: Arc<Mutex<Option<PendingRefresh>>>,
        last_issued: Arc<Mutex<Option<Issued>>>,
        on_failure: OnFailure,
    ) -> Option<String> {
        let token = match Self::fetch_new_pair(&provider, store.as_ref()).await {
            Ok(pair) => {
                let access_token = pair.access_token.clone();
                if let Err(err) = store.save(pair).await {
                    warn!(message = "Unable to persist refreshed tokens", error = %err);
                }
                last_issued.lock().await.replace(Issued {
                    access_token: access_token.clone(),
                    at: SystemTime::now(),
                });
                debug!(message = "Got new token");
                Some(access_token)
            }
            Err(err) => {
                let rejected = match &err {
                    Error::MissingRefreshToken => true,
                    Error::Provider(err) => Provider::is_rejection(err),
                };
                if on_failure == OnFailure::Clear || rejected {
                    warn!(message = "Token refresh failed, clearing tokens", error = %err);
                    if let Err(err) = store.clear().await {
                        warn!(message = "Unable to clear tokens", error = %err);
                    }
                } else {
                    warn!(message = "Token refresh failed, keeping tokens", error = %err);
                }
                None
            }
        };

        // Back to idle before anyone waiting sees the outcome.
        in_flight.lock().await.take();
        token
    }
}
