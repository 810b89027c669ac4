//! VRChat REST client implementation.

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Method, Response, StatusCode};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    ApiError, ApiResponse, CurrentUser, Friend, Instance, PresenceState, RemoteConfig,
    ResourceResolver, SessionProvider, World,
};

/// Default REST API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.vrchat.cloud/api/1";

/// Friends returned per page by `/auth/user/friends`.
const FRIENDS_PAGE_SIZE: usize = 100;

/// HTTP client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL all paths are appended to.
    pub api_base: String,
    pub user_agent: String,
    /// Total request timeout.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// How long transient failures are retried before giving up.
    pub retry_window: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            user_agent: format!("vrclink/{}", env!("CARGO_PKG_VERSION")),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            retry_window: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }
}

/// Cookies that make up a login.
#[derive(Debug, Clone)]
struct Session {
    auth_token: String,
    two_factor_token: Option<String>,
    /// False while a two-factor code is still outstanding.
    verified: bool,
}

impl Session {
    fn cookie_header(&self) -> String {
        match &self.two_factor_token {
            Some(tfa) => format!("auth={}; twoFactorAuth={}", self.auth_token, tfa),
            None => format!("auth={}", self.auth_token),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Credentials<'a> {
    Basic(&'a str),
    Cookie(&'a str),
}

/// Client for the VRChat REST API.
pub struct VrcClient {
    http: Client,
    config: ClientConfig,
    api_key: RwLock<Option<String>>,
    session: RwLock<Option<Session>>,
}

impl VrcClient {
    /// Create a new client.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            http,
            config,
            api_key: RwLock::new(None),
            session: RwLock::new(None),
        })
    }

    /// Log in with username and password.
    ///
    /// Returns [`ApiError::MfaRequired`] when the account has two-factor
    /// authentication enabled; finish the login with [`Self::verify_totp`].
    pub async fn login(&self, username: &str, password: &str) -> Result<CurrentUser, ApiError> {
        let basic = format!("Basic {}", BASE64.encode(format!("{username}:{password}")));

        let response = self
            .send(&Method::GET, "/auth/user", &[], None, Some(Credentials::Basic(&basic)))
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Auth("invalid username or password".to_string()));
        }

        let auth_token = cookie_value(response.headers(), "auth");
        let body = Self::into_json(response, "user", username).await?;
        let auth_token = auth_token
            .ok_or_else(|| ApiError::Auth("login response carried no auth cookie".to_string()))?;

        if body.get("requiresTwoFactorAuth").is_some() {
            debug!("login requires two-factor authentication");
            *self.session.write().await = Some(Session {
                auth_token,
                two_factor_token: None,
                verified: false,
            });
            return Err(ApiError::MfaRequired);
        }

        let user = CurrentUser::from_json(&body)?;
        *self.session.write().await = Some(Session {
            auth_token,
            two_factor_token: None,
            verified: true,
        });

        info!(user_id = %user.profile.id, display_name = %user.profile.display_name, "logged in");
        Ok(user)
    }

    /// Finish a two-factor login with a TOTP code.
    pub async fn verify_totp(&self, code: &str) -> Result<CurrentUser, ApiError> {
        let cookie = self.session_cookie(false).await?;
        let body = serde_json::json!({ "code": code });

        let response = self
            .send(
                &Method::POST,
                "/auth/twofactorauth/totp/verify",
                &[],
                Some(&body),
                Some(Credentials::Cookie(&cookie)),
            )
            .await?;

        let two_factor_token = cookie_value(response.headers(), "twoFactorAuth");
        let result = Self::into_json(response, "two-factor code", code).await?;

        if !result.get("verified").and_then(Value::as_bool).unwrap_or(false) {
            return Err(ApiError::Auth("invalid two-factor code".to_string()));
        }

        if let Some(session) = self.session.write().await.as_mut() {
            session.verified = true;
            session.two_factor_token = two_factor_token;
        }

        let user = self.current_user().await?;
        info!(user_id = %user.profile.id, "two-factor login verified");
        Ok(user)
    }

    /// Resume a session from a previously issued auth token.
    pub async fn login_with_token(&self, auth_token: &str) -> Result<CurrentUser, ApiError> {
        *self.session.write().await = Some(Session {
            auth_token: auth_token.to_string(),
            two_factor_token: None,
            verified: true,
        });

        match self.current_user().await {
            Ok(user) => Ok(user),
            Err(e) => {
                *self.session.write().await = None;
                Err(e)
            }
        }
    }

    /// Whether a completed login is held.
    pub async fn is_logged_in(&self) -> bool {
        self.session
            .read()
            .await
            .as_ref()
            .is_some_and(|s| s.verified)
    }

    /// Fetch the logged-in user.
    pub async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        let body = self.get_json("/auth/user", &[], "user", "current").await?;
        CurrentUser::from_json(&body)
    }

    /// Get the API key, fetching the remote config on first use.
    async fn api_key(&self) -> Result<String, ApiError> {
        if let Some(key) = self.api_key.read().await.as_ref() {
            return Ok(key.clone());
        }

        let url = format!("{}/config", self.config.api_base);
        let response = self.http.get(&url).send().await?;
        let body = Self::into_json(response, "config", "remote").await?;
        let config: RemoteConfig = serde_json::from_value(body)?;

        debug!("fetched remote config");
        *self.api_key.write().await = Some(config.api_key.clone());
        Ok(config.api_key)
    }

    /// Cookie header for the current session.
    async fn session_cookie(&self, require_verified: bool) -> Result<String, ApiError> {
        let session = self.session.read().await;
        match session.as_ref() {
            None => Err(ApiError::NotAuthenticated),
            Some(s) if require_verified && !s.verified => Err(ApiError::MfaRequired),
            Some(s) => Ok(s.cookie_header()),
        }
    }

    /// Send a request, retrying connection failures and 5xx responses.
    async fn send(
        &self,
        method: &Method,
        path: &str,
        params: &[(&str, &str)],
        body: Option<&Value>,
        credentials: Option<Credentials<'_>>,
    ) -> Result<Response, ApiError> {
        let api_key = self.api_key().await?;
        let api_key = api_key.as_str();
        let url = format!("{}{}", self.config.api_base, path);
        let url = url.as_str();

        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(500),
            max_elapsed_time: Some(self.config.retry_window),
            ..Default::default()
        };

        backoff::future::retry(policy, || {
            let method = method.clone();
            async move {
                let mut request = self
                    .http
                    .request(method, url)
                    .query(&[("apiKey", api_key)])
                    .query(params);

                match credentials {
                    Some(Credentials::Basic(header)) => {
                        request = request.header("Authorization", header);
                    }
                    Some(Credentials::Cookie(cookie)) => {
                        request = request.header("Cookie", cookie);
                    }
                    None => {}
                }

                if let Some(body) = body {
                    request = request.json(body);
                }

                let response = request.send().await.map_err(|e| {
                    let err = ApiError::Http(e);
                    if err.is_transient() {
                        warn!(error = %err, path = %path, "transient request failure, retrying");
                        backoff::Error::transient(err)
                    } else {
                        backoff::Error::permanent(err)
                    }
                })?;

                if response.status().is_server_error() {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    warn!(status, path = %path, "server error, retrying");
                    return Err(backoff::Error::transient(ApiError::Status { status, message }));
                }

                Ok(response)
            }
        })
        .await
    }

    /// GET a path with the session cookie and parse the body.
    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, &str)],
        kind: &'static str,
        id: &str,
    ) -> Result<Value, ApiError> {
        let cookie = self.session_cookie(true).await?;
        let response = self
            .send(&Method::GET, path, params, None, Some(Credentials::Cookie(&cookie)))
            .await?;
        Self::into_json(response, kind, id).await
    }

    /// Map the response status to an error, or parse the JSON body.
    async fn into_json(
        response: Response,
        kind: &'static str,
        id: &str,
    ) -> Result<Value, ApiError> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::NotAuthenticated);
        }

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound {
                kind,
                id: id.to_string(),
            });
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            return Err(ApiError::RateLimited {
                endpoint: Some(response.url().path().to_string()),
                retry_after_secs,
            });
        }

        if !status.is_success() {
            let text = response.text().await.map_err(|e| {
                ApiError::InvalidResponse(format!(
                    "request failed ({}): failed to read response: {}",
                    status, e
                ))
            })?;

            // API errors look like {"error": {"message": "...", "status_code": 400}}
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or(text);

            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl SessionProvider for VrcClient {
    async fn session_token(&self) -> Result<String, ApiError> {
        match self.session.read().await.as_ref() {
            Some(session) if session.verified => Ok(session.auth_token.clone()),
            _ => Err(ApiError::NotAuthenticated),
        }
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError> {
        let cookie = self.session_cookie(true).await?;
        let response = self
            .send(&method, path, params, None, Some(Credentials::Cookie(&cookie)))
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await?;
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));

        Ok(ApiResponse { status, data })
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let cookie = self.session_cookie(false).await?;
        let result = self
            .send(&Method::PUT, "/logout", &[], None, Some(Credentials::Cookie(&cookie)))
            .await;

        // The local session is gone either way.
        *self.session.write().await = None;

        let response = result?;
        if !response.status().is_success() && response.status() != StatusCode::UNAUTHORIZED {
            warn!(status = %response.status(), "logout request was not acknowledged");
        }

        info!("logged out");
        Ok(())
    }
}

#[async_trait]
impl ResourceResolver for VrcClient {
    async fn fetch_user(&self, id: &str) -> Result<Friend, ApiError> {
        let body = self.get_json(&format!("/users/{id}"), &[], "user", id).await?;
        Friend::from_json(&body)
    }

    async fn fetch_world(&self, id: &str) -> Result<World, ApiError> {
        let body = self.get_json(&format!("/worlds/{id}"), &[], "world", id).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn fetch_instance(
        &self,
        world_id: &str,
        instance_id: &str,
    ) -> Result<Instance, ApiError> {
        let location = format!("{world_id}:{instance_id}");
        let body = self
            .get_json(&format!("/instances/{location}"), &[], "instance", &location)
            .await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn fetch_friends(&self, offline: bool) -> Result<Vec<Friend>, ApiError> {
        let offline_param = if offline { "true" } else { "false" };
        let page_size = FRIENDS_PAGE_SIZE.to_string();
        let mut friends = Vec::new();
        let mut offset = 0usize;

        loop {
            let offset_param = offset.to_string();
            let page = self
                .get_json(
                    "/auth/user/friends",
                    &[
                        ("offline", offline_param),
                        ("n", &page_size),
                        ("offset", &offset_param),
                    ],
                    "friends",
                    offline_param,
                )
                .await?;

            let entries = page.as_array().ok_or_else(|| {
                ApiError::InvalidResponse("friends page is not an array".to_string())
            })?;

            for entry in entries {
                let friend = Friend::from_json(entry)?;
                // The offline list omits state; the online list mixes online and active.
                let state = if offline {
                    PresenceState::Offline
                } else {
                    PresenceState::from_user_json(entry).unwrap_or(PresenceState::Online)
                };
                friends.push(friend.with_presence(state));
            }

            if entries.len() < FRIENDS_PAGE_SIZE {
                break;
            }
            offset += entries.len();
        }

        debug!(count = friends.len(), offline, "fetched friends");
        Ok(friends)
    }
}

/// Extract a cookie value from `Set-Cookie` headers.
fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().to_string())
}
