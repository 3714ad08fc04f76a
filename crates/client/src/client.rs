//! Backend-aware API client
//!
//! Every outgoing request gets the resolved backend origin and the stored
//! bearer token. A 401 is retried once after a token refresh that is shared
//! by all concurrent requests; a failed refresh ends the session.

use crate::error::{ClientError, ErrorKind};
use crate::refresh::{RefreshCoordinator, RefreshFailure, RefreshOutcome};
use crate::reply::Reply;
use crate::resolver::{BackendResolver, endpoint};
use crate::session::{Session, TokenStore};
use crate::types::{REFRESH_PATH, RefreshRequest, RefreshResponse};
use bytes::Bytes;
use reqwest::{Client, ClientBuilder, Method, StatusCode, header};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

/// Invoked once per terminated session, e.g. to send the user to login
pub type AuthFailedCallback = Arc<dyn Fn() + Send + Sync>;

const USER_AGENT: &str = concat!("licensedesk-client/", env!("CARGO_PKG_VERSION"));

/// A replayable request description
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<Value>,
    query: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            query: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Append a query parameter
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub const fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

struct Inner {
    http: Client,
    store: TokenStore,
    resolver: BackendResolver,
    hostname: String,
    refresh: RefreshCoordinator,
    on_auth_failed: Option<AuthFailedCallback>,
}

impl Inner {
    fn backend_url(&self) -> Result<Url, ClientError> {
        let profile = self.store.load_user()?;
        let preference = self.store.backend_preference()?;
        Ok(self
            .resolver
            .resolve(profile.as_ref(), preference.as_deref(), &self.hostname))
    }

    fn build(&self, origin: &Url, request: &ApiRequest, token: Option<&str>) -> reqwest::RequestBuilder {
        let url = endpoint(origin, &request.path);
        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
    }

    async fn send(&self, request: &ApiRequest, token: Option<&str>) -> Result<reqwest::Response, ClientError> {
        let origin = self.backend_url()?;
        debug!(
            method = %request.method,
            origin = %origin,
            path = %request.path,
            authenticated = token.is_some(),
            "dispatching request"
        );
        Ok(self.build(&origin, request, token).send().await?)
    }

    async fn dispatch<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        token: Option<&str>,
    ) -> Result<Reply<T>, ClientError> {
        let response = self.send(request, token).await?;
        Reply::decode(response).await
    }

    /// Clear credentials and notify the collaborator
    fn terminate_session(&self) {
        if let Err(error) = self.store.clear() {
            error!(%error, "failed to clear stored session");
        }
        if let Some(callback) = &self.on_auth_failed {
            callback();
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<Reply<RefreshResponse>, ClientError> {
        let body = serde_json::to_value(RefreshRequest { refresh_token })?;
        self.dispatch(&ApiRequest::post(REFRESH_PATH).json(body), None).await
    }

    /// The one network exchange behind a refresh; persists or terminates
    async fn exchange(self: Arc<Self>, refresh_token: String) -> RefreshOutcome {
        info!("refreshing access token");
        let message = match self.request_refresh(&refresh_token).await {
            Ok(Reply::Success(tokens)) => {
                let rotated = tokens.refresh_token.as_deref().unwrap_or(&refresh_token);
                match self.store.update_tokens(&tokens.token, Some(rotated)) {
                    Ok(Some(session)) => {
                        info!("access token refreshed");
                        return Ok(session);
                    }
                    Ok(None) => {
                        warn!("session ended while the token refresh was in flight");
                        return Err(RefreshFailure::Rejected("session ended".into()));
                    }
                    Err(error) => error.to_string(),
                }
            }
            Ok(Reply::SubscriptionRequired { message }) => {
                warn!(%message, "token refresh refused: subscription required");
                return Err(RefreshFailure::SubscriptionRequired(message));
            }
            Ok(Reply::Unauthorized { message } | Reply::Failure { message, .. }) => message,
            Err(error) if matches!(error.kind(), ErrorKind::NetworkError | ErrorKind::Timeout) => {
                error!(%error, "token refresh could not reach the backend, ending session");
                self.terminate_session();
                return Err(RefreshFailure::Unavailable(error.kind(), error.to_string()));
            }
            Err(error) => error.to_string(),
        };

        error!(%message, "token refresh failed, ending session");
        self.terminate_session();
        Err(RefreshFailure::Rejected(message))
    }
}

/// API client with origin resolution and single-flight token refresh
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// Create a new client builder
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    pub fn resolver(&self) -> &BackendResolver {
        &self.inner.resolver
    }

    /// Hostname fed to the resolver's mapping table
    pub fn hostname(&self) -> &str {
        &self.inner.hostname
    }

    /// The origin the next request will be sent to
    pub fn backend_url(&self) -> Result<Url, ClientError> {
        self.inner.backend_url()
    }

    /// Whether a token exchange is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_refreshing()
    }

    /// Send without credentials and without the refresh path
    pub async fn execute_public<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        self.inner.dispatch(&request, None).await?.into_result()
    }

    /// Send with credentials, refreshing once on 401
    pub async fn execute<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, ClientError> {
        let sent_token = self.inner.store.load()?.map(|session| session.access_token);

        match self.inner.dispatch::<T>(&request, sent_token.as_deref()).await? {
            Reply::Unauthorized { message } => {
                debug!(path = %request.path, "request unauthorized, attempting token refresh");
                let session = self.recover_session(sent_token.as_deref(), message).await?;
                match self.inner.dispatch::<T>(&request, Some(&session.access_token)).await? {
                    Reply::Unauthorized { message } => Err(ClientError::AuthExpired(message)),
                    reply => reply.into_result(),
                }
            }
            reply => reply.into_result(),
        }
    }

    /// Single attempt with stored credentials, for probes that must not refresh
    pub(crate) async fn probe(&self, request: &ApiRequest) -> Result<(StatusCode, Bytes), ClientError> {
        let token = self.inner.store.load()?.map(|session| session.access_token);
        let response = self.inner.send(request, token.as_deref()).await?;
        let status = response.status();
        Ok((status, response.bytes().await?))
    }

    /// Obtain a session usable for replaying a request that got 401
    async fn recover_session(&self, sent_token: Option<&str>, message: String) -> Result<Session, ClientError> {
        let Some(current) = self.inner.store.load()? else {
            return Err(ClientError::AuthExpired(message));
        };

        if sent_token != Some(current.access_token.as_str()) {
            debug!("token was refreshed while the request was in flight");
            return Ok(current);
        }

        let Some(refresh_token) = current.refresh_token else {
            warn!("no refresh token stored, ending session");
            self.inner.terminate_session();
            return Err(ClientError::AuthExpired(message));
        };

        let inner = Arc::clone(&self.inner);
        match self.inner.refresh.run(move || inner.exchange(refresh_token)).await {
            Ok(session) => Ok(session),
            Err(RefreshFailure::Rejected(message)) => Err(ClientError::AuthExpired(message)),
            Err(RefreshFailure::Unavailable(kind, message)) => Err(ClientError::RefreshFailed { kind, message }),
            Err(RefreshFailure::SubscriptionRequired(message)) => {
                Err(ClientError::SubscriptionExpired(message))
            }
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("resolver", &self.inner.resolver)
            .field("hostname", &self.inner.hostname)
            .finish_non_exhaustive()
    }
}

/// Builder for ApiClient
#[derive(Default)]
pub struct ApiClientBuilder {
    store: Option<TokenStore>,
    resolver: Option<BackendResolver>,
    hostname: Option<String>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    on_auth_failed: Option<AuthFailedCallback>,
}

impl ApiClientBuilder {
    /// Set the token store; defaults to two in-memory tiers
    pub fn store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the origin resolver; defaults to the built-in table
    pub fn resolver(mut self, resolver: BackendResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the hostname the client is served from
    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Set the request timeout
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the callback run when a session is terminated
    pub fn on_auth_failed(mut self, callback: AuthFailedCallback) -> Self {
        self.on_auth_failed = Some(callback);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<ApiClient, ClientError> {
        let hostname = self.hostname.unwrap_or_else(|| "localhost".to_string());
        if hostname.trim().is_empty() {
            return Err(ClientError::Configuration("hostname must not be empty".into()));
        }

        let mut client_builder = ClientBuilder::new()
            .user_agent(self.user_agent.unwrap_or_else(|| USER_AGENT.to_string()));
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        Ok(ApiClient {
            inner: Arc::new(Inner {
                http: client_builder.build()?,
                store: self.store.unwrap_or_else(TokenStore::in_memory),
                resolver: self.resolver.unwrap_or_default(),
                hostname,
                refresh: RefreshCoordinator::new(),
                on_auth_failed: self.on_auth_failed,
            }),
        })
    }
}
