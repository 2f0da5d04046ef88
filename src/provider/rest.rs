//! Hosted backend client
//!
//! HTTP client for a Supabase-compatible backend: GoTrue for identity,
//! PostgREST for rows, and the Phoenix realtime socket for changes.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use super::error::{ProviderError, ProviderResult};
use super::realtime::RealtimeChannel;
use super::{
    OAuthProvider, Profile, Provider, Session, SignIn, Subscription, SubscriptionHandle,
};
use crate::bookmarks::{BookmarkRecord, NewBookmark, BOOKMARKS_TABLE};
use crate::config::Config;

/// Hosted backend client
pub struct RestProvider {
    client: Client,
    config: RestConfig,
    /// Cached session, observed by `on_session_change`
    session_tx: watch::Sender<Option<Session>>,
    /// Joined realtime channels: SubscriptionHandle → RealtimeChannel
    channels: Mutex<HashMap<SubscriptionHandle, RealtimeChannel>>,
}

/// Configuration for the hosted backend client
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Project URL (e.g., "https://xyzcompany.supabase.co")
    pub base_url: String,
    /// Public API key sent with every request
    pub anon_key: String,
    /// Request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// Interval between realtime heartbeats
    pub heartbeat_secs: u64,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            anon_key: String::new(),
            request_timeout_ms: 10_000,
            heartbeat_secs: 30,
        }
    }
}

impl From<&Config> for RestConfig {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.backend.url.trim_end_matches('/').to_string(),
            anon_key: config.backend.anon_key.clone(),
            request_timeout_ms: config.backend.request_timeout_ms,
            heartbeat_secs: config.realtime.heartbeat_secs,
        }
    }
}

impl RestProvider {
    /// Create a new client with the given configuration
    pub fn new(config: RestConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        let (session_tx, _) = watch::channel(None);

        Ok(Self {
            client,
            config,
            session_tx,
            channels: Mutex::new(HashMap::new()),
        })
    }

    /// Adopt an access token obtained from a finished OAuth redirect.
    ///
    /// The token is checked against the identity endpoint; on success the
    /// session is cached and announced to session listeners.
    pub async fn restore_session(&self, access_token: &str) -> ProviderResult<Option<Session>> {
        let session = self.fetch_user(access_token).await?;
        self.session_tx.send_replace(session.clone());
        Ok(session)
    }

    fn rest_url(&self) -> String {
        format!("{}/rest/v1/{}", self.config.base_url, BOOKMARKS_TABLE)
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url, path)
    }

    fn realtime_url(&self) -> String {
        let ws_base = self
            .config
            .base_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        format!(
            "{}/realtime/v1/websocket?apikey={}&vsn=1.0.0",
            ws_base,
            urlencoding::encode(&self.config.anon_key)
        )
    }

    /// OAuth authorize URL for `provider`
    pub fn authorize_url(&self, provider: OAuthProvider) -> String {
        format!(
            "{}?provider={}",
            self.auth_url("authorize"),
            urlencoding::encode(&provider.to_string())
        )
    }

    fn access_token(&self) -> Option<String> {
        self.session_tx
            .borrow()
            .as_ref()
            .and_then(|s| s.access_token.clone())
    }

    /// Attach the API key and the best available bearer token
    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token()
            .unwrap_or_else(|| self.config.anon_key.clone());
        request
            .header("apikey", &self.config.anon_key)
            .bearer_auth(bearer)
    }

    async fn fetch_user(&self, access_token: &str) -> ProviderResult<Option<Session>> {
        let response = self
            .client
            .get(self.auth_url("user"))
            .header("apikey", &self.config.anon_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        match response.status().as_u16() {
            401 | 403 => Ok(None),
            _ if response.status().is_success() => {
                let user: AuthUser = response.json().await?;
                Ok(Some(user.into_session(access_token)))
            }
            _ => Err(error_from_response(response).await),
        }
    }
}

#[async_trait]
impl Provider for RestProvider {
    fn name(&self) -> &str {
        "rest"
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        Ok(self.session_tx.borrow().clone())
    }

    async fn lookup_user(&self) -> ProviderResult<Option<Session>> {
        match self.access_token() {
            Some(token) => self.fetch_user(&token).await,
            None => Ok(None),
        }
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> ProviderResult<SignIn> {
        let url = self.authorize_url(provider);
        tracing::info!(oauth_provider = %provider, "OAuth sign-in requires a browser redirect");
        Ok(SignIn::Redirect { url })
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        if let Some(token) = self.access_token() {
            let response = self
                .client
                .post(self.auth_url("logout"))
                .header("apikey", &self.config.anon_key)
                .bearer_auth(token)
                .send()
                .await?;

            // An already expired token still counts as signed out
            if !response.status().is_success() && response.status().as_u16() != 401 {
                return Err(error_from_response(response).await);
            }
        }

        self.session_tx.send_replace(None);
        tracing::info!("Signed out");
        Ok(())
    }

    async fn query(&self, owner: &str) -> ProviderResult<Vec<BookmarkRecord>> {
        let url = format!(
            "{}?select=*&user_id=eq.{}&order=created_at.desc",
            self.rest_url(),
            urlencoding::encode(owner)
        );

        let response = self.authorized(self.client.get(&url)).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let rows: Vec<BookmarkRecord> = response.json().await?;
        tracing::debug!(owner_id = %owner, rows = rows.len(), "Fetched bookmarks");
        Ok(rows)
    }

    async fn insert(&self, row: NewBookmark) -> ProviderResult<BookmarkRecord> {
        let response = self
            .authorized(self.client.post(self.rest_url()))
            .header("Prefer", "return=representation")
            .json(&[row])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let mut rows: Vec<BookmarkRecord> = response.json().await?;
        if rows.is_empty() {
            return Err(ProviderError::Decode(
                "insert returned no rows".to_string(),
            ));
        }
        Ok(rows.swap_remove(0))
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        let url = format!("{}?id=eq.{}", self.rest_url(), urlencoding::encode(id));

        let response = self.authorized(self.client.delete(&url)).send().await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(())
    }

    async fn subscribe_changes(&self, owner: &str) -> ProviderResult<Subscription> {
        let topic = format!("realtime:public:{}:user={}", BOOKMARKS_TABLE, owner);
        let token = self.access_token();

        let (channel, events) = RealtimeChannel::join(
            &self.realtime_url(),
            topic,
            owner,
            token.as_deref(),
            Duration::from_secs(self.config.heartbeat_secs.max(1)),
        )
        .await?;

        let handle = SubscriptionHandle(Uuid::new_v4().to_string());
        self.channels.lock().await.insert(handle.clone(), channel);
        Ok(Subscription { handle, events })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> ProviderResult<()> {
        let channel = self.channels.lock().await.remove(&handle);
        match channel {
            Some(channel) => {
                tracing::debug!(subscription = %handle, topic = %channel.topic(), "Leaving channel");
                channel.leave().await;
            }
            None => tracing::debug!(subscription = %handle, "Unknown subscription"),
        }
        Ok(())
    }
}

// ============================================
// Response DTOs
// ============================================

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
    #[serde(default)]
    user_metadata: UserMetadata,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    full_name: Option<String>,
    #[serde(default)]
    avatar_url: Option<String>,
}

impl AuthUser {
    fn into_session(self, access_token: &str) -> Session {
        Session {
            user_id: self.id,
            access_token: Some(access_token.to_string()),
            profile: Profile {
                full_name: self.user_metadata.full_name,
                avatar_url: self.user_metadata.avatar_url,
            },
        }
    }
}

/// Error body shapes returned by PostgREST and GoTrue
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        self.message
            .or(self.msg)
            .or(self.error_description)
            .or(self.error)
    }
}

/// Extract the backend's own message from a failed response
fn parse_error_message(text: &str) -> String {
    serde_json::from_str::<ErrorBody>(text)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| text.trim().to_string())
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = parse_error_message(&text);

    tracing::debug!(status, message = %message, "Backend request failed");
    if status == 401 {
        ProviderError::auth(message)
    } else {
        ProviderError::api(status, message)
    }
}
