//! Authenticated client for the backend API.

pub mod auth;
pub mod error;
pub mod utils;

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use self::error::Error;
use self::auth::{
    expiry,
    refresh::{RefreshExchange, REFRESH_ENDPOINT},
    store::{FileStore, MemoryStore},
    token_manager::TokenManager,
    TokenStore,
};
use crate::{
    config::Config,
    core::{AuthTokens, Credentials, LogSessionHandler, Registration, SessionHandler, User},
};

pub const LOGIN_ENDPOINT: &str = "/auth/login";
pub const REGISTER_ENDPOINT: &str = "/auth/register";
pub const ME_ENDPOINT: &str = "/auth/me";

const AUTH_ENDPOINTS: [&str; 3] = [LOGIN_ENDPOINT, REGISTER_ENDPOINT, REFRESH_ENDPOINT];

/// Endpoints whose 401 is an answer, not an expired session.
pub fn is_auth_endpoint(endpoint: &str) -> bool {
    let path = endpoint
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default()
        .trim_end_matches('/');
    let path = path.strip_prefix('/').unwrap_or(path);
    AUTH_ENDPOINTS
        .iter()
        .any(|auth| auth.trim_start_matches('/') == path)
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: reqwest::Client,
    config: Config,
    tokens: TokenManager<RefreshExchange>,
    session: Arc<dyn SessionHandler>,
}

impl ApiClient {
    pub fn builder(config: Config) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            http: None,
            store: None,
            session: None,
        }
    }

    /// Client with an in-memory token store.
    pub fn new(config: Config) -> Result<Self, Error> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        self.inner.tokens.store()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.tokens().access_token().await.is_some()
    }

    /// Whether the stored access token expires within `threshold`, judged locally.
    pub async fn is_token_expiring_soon(&self, threshold: Duration) -> bool {
        let token = self.tokens().access_token().await;
        expiry::expires_within(token.as_deref(), threshold, SystemTime::now())
    }

    pub async fn get<T>(&self, endpoint: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.request(Method::GET, endpoint, None, HeaderMap::new())
            .await
    }

    /// GET with `query` encoded into the endpoint's query string.
    pub async fn get_query<T, Q>(&self, endpoint: &str, query: &Q) -> Result<T, Error>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let query = serde_urlencoded::to_string(query)?;
        if query.is_empty() {
            return self.get(endpoint).await;
        }
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let endpoint = format!("{}{}{}", endpoint, separator, query);
        self.get(&endpoint).await
    }

    pub async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.with_body(Method::POST, endpoint, body).await
    }

    pub async fn patch<T, B>(&self, endpoint: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.with_body(Method::PATCH, endpoint, body).await
    }

    pub async fn put<T, B>(&self, endpoint: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.with_body(Method::PUT, endpoint, body).await
    }

    /// Deletes usually answer 204; pick [`Empty`](crate::core::Empty) or
    /// [`Value`] for `T`, since `()` can't be read from the empty object a
    /// 204 turns into.
    pub async fn delete<T>(&self, endpoint: &str) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        self.request(Method::DELETE, endpoint, None, HeaderMap::new())
            .await
    }

    async fn with_body<T, B>(&self, method: Method, endpoint: &str, body: &B) -> Result<T, Error>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let body = serde_json::to_value(body)?;
        self.request(method, endpoint, Some(body), HeaderMap::new())
            .await
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<AuthTokens, Error> {
        let tokens: AuthTokens = self.post(LOGIN_ENDPOINT, credentials).await?;
        self.tokens().save(tokens.clone().into()).await?;
        info!(message = "Logged in", email = %credentials.email);
        Ok(tokens)
    }

    pub async fn register(&self, registration: &Registration) -> Result<AuthTokens, Error> {
        let tokens: AuthTokens = self.post(REGISTER_ENDPOINT, registration).await?;
        self.tokens().save(tokens.clone().into()).await?;
        info!(message = "Registered", email = %registration.email);
        Ok(tokens)
    }

    pub async fn me(&self) -> Result<User, Error> {
        self.get(ME_ENDPOINT).await
    }

    pub async fn logout(&self) -> Result<(), Error> {
        self.tokens().clear().await?;
        info!(message = "Logged out");
        Ok(())
    }

    /// Perform one API call, recovering once from an expired access token.
    ///
    /// A 401 on a regular endpoint refreshes the pair and re-issues the call
    /// a single time. If the refresh fails the tokens are cleared, the session
    /// handler is told to send the user to the login route, and
    /// [`Error::SessionExpired`] is returned. A 401 from an auth endpoint or
    /// from the re-issued call comes back as [`Error::Unauthorized`].
    ///
    /// `headers` are sent along; `Authorization` is replaced by the stored
    /// token when there is one. A 204 is read as `{}`, so `T` must accept an
    /// empty object ([`Empty`](crate::core::Empty), [`Value`], a struct of
    /// optional fields), not `()`.
    pub async fn request<T>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        headers: HeaderMap,
    ) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        let url = self.inner.config.endpoint_url(endpoint);
        let is_auth = is_auth_endpoint(endpoint);

        let mut token = if is_auth {
            self.tokens().access_token().await
        } else {
            self.initial_token().await
        };
        let mut is_retry = false;

        loop {
            let res = self
                .send(method.clone(), &url, body.as_ref(), &headers, token.as_deref())
                .await?;
            let status = res.status();

            if status == StatusCode::UNAUTHORIZED && !is_auth && !is_retry {
                debug!(message = "Got 401, refreshing", %method, endpoint);
                match self.inner.tokens.refresh_stale(token.as_deref()).await {
                    Some(new_token) => {
                        token = Some(new_token);
                        is_retry = true;
                        continue;
                    }
                    None => return Err(self.expire_session().await),
                }
            }

            if status == StatusCode::UNAUTHORIZED {
                let detail = utils::server_error(status, res).await.detail;
                debug!(message = "Unauthorized", %method, endpoint, is_retry);
                return Err(Error::Unauthorized { detail });
            }

            let res = utils::check_status(res).await?;
            return Self::parse_body(res).await;
        }
    }

    /// Token for the first attempt, refreshed ahead of time when configured.
    async fn initial_token(&self) -> Option<String> {
        match self.inner.config.refresh_threshold {
            Some(threshold) => self.inner.tokens.fresh_token(threshold).await,
            None => self.tokens().access_token().await,
        }
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &HeaderMap,
        token: Option<&str>,
    ) -> Result<reqwest::Response, Error> {
        let mut headers = headers.clone();
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::InvalidToken)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self.inner.http.request(method, url).headers(headers);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let req = builder.build()?;
        let res = self.inner.http.execute(req).await?;
        Ok(res)
    }

    async fn parse_body<T>(res: reqwest::Response) -> Result<T, Error>
    where
        T: DeserializeOwned,
    {
        if res.status() == StatusCode::NO_CONTENT {
            return Ok(serde_json::from_value(Value::Object(Default::default()))?);
        }
        let bytes = res.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Clear the tokens, then hand off to the session handler.
    async fn expire_session(&self) -> Error {
        if let Err(err) = self.tokens().clear().await {
            warn!(message = "Unable to clear tokens", error = %err);
        }
        warn!(message = "Session expired", login_route = %self.inner.config.login_route);
        self.inner
            .session
            .session_expired(&self.inner.config.login_route);
        Error::SessionExpired
    }
}

pub struct ApiClientBuilder {
    config: Config,
    http: Option<reqwest::Client>,
    store: Option<Arc<dyn TokenStore>>,
    session: Option<Arc<dyn SessionHandler>>,
}

impl ApiClientBuilder {
    /// Use a preconfigured HTTP client; `request_timeout` is then ignored.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    pub fn store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn session_handler(mut self, handler: Arc<dyn SessionHandler>) -> Self {
        self.session = Some(handler);
        self
    }

    /// Keep tokens in `config.token_file`, when it is set.
    pub async fn open_token_file(self) -> Self {
        match self.config.token_file.clone() {
            Some(path) => {
                let store = FileStore::open(path).await;
                self.store(Arc::new(store))
            }
            None => self,
        }
    }

    pub fn build(self) -> Result<ApiClient, Error> {
        let Self {
            config,
            http,
            store,
            session,
        } = self;

        reqwest::Url::parse(&config.api_root())
            .map_err(|err| Error::Build(format!("invalid base url {:?}: {}", config.base_url, err)))?;

        let http = match http {
            Some(http) => http,
            None => {
                let mut builder = reqwest::Client::builder()
                    .user_agent(concat!("agentdesk/", env!("CARGO_PKG_VERSION")));
                if let Some(timeout) = config.request_timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build()?
            }
        };

        let store = store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let session = session.unwrap_or_else(|| Arc::new(LogSessionHandler));
        let exchange = RefreshExchange {
            client: http.clone(),
            url: config.endpoint_url(REFRESH_ENDPOINT),
        };

        Ok(ApiClient {
            inner: Arc::new(Inner {
                http,
                config,
                tokens: TokenManager::new(exchange, store),
                session,
            }),
        })
    }
}
