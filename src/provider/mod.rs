//! Hosted Backend Providers
//!
//! Authentication, row storage and realtime change notification are delegated
//! to a hosted backend. The [`Provider`] trait is the seam every component
//! talks through; a single instance is built at startup and shared as
//! `Arc<dyn Provider>`.
//!
//! ## Implementations
//!
//! - [`MemoryProvider`]: in-process backend with a realtime fan-out hub. Used
//!   for local runs and tests; several shells sharing one instance see each
//!   other's changes like browser tabs do.
//! - [`RestProvider`]: HTTP client for a Supabase-compatible backend, with a
//!   Phoenix websocket channel for realtime changes.

mod error;
mod hub;
mod memory;
mod realtime;
mod rest;

pub use error::{ProviderError, ProviderResult};
pub use hub::{ChangeHub, HubConfig};
pub use memory::{MemoryProvider, Operation};
pub use realtime::{decode_change, PhoenixMessage, RealtimeChannel};
pub use rest::{RestConfig, RestProvider};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

use crate::bookmarks::{BookmarkRecord, ChangeEvent, NewBookmark};
use crate::config::{BackendKind, Config};

/// Common trait for hosted backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Current session from the client's own cache
    async fn get_session(&self) -> ProviderResult<Option<Session>>;

    /// Secondary identity lookup used when no session is cached
    async fn lookup_user(&self) -> ProviderResult<Option<Session>>;

    /// Receiver that observes every sign-in and sign-out
    fn on_session_change(&self) -> watch::Receiver<Option<Session>>;

    /// Start an OAuth sign-in with the given identity provider
    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> ProviderResult<SignIn>;

    /// End the current session
    async fn sign_out(&self) -> ProviderResult<()>;

    /// All bookmarks owned by `owner`, newest first
    async fn query(&self, owner: &str) -> ProviderResult<Vec<BookmarkRecord>>;

    /// Create a bookmark, returning the stored row
    async fn insert(&self, row: NewBookmark) -> ProviderResult<BookmarkRecord>;

    /// Delete a bookmark by id
    async fn delete(&self, id: &str) -> ProviderResult<()>;

    /// Open a push subscription for rows owned by `owner`
    async fn subscribe_changes(&self, owner: &str) -> ProviderResult<Subscription>;

    /// Release a push subscription
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> ProviderResult<()>;
}

/// Signed-in identity as reported by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Owner id used to scope every query and subscription
    pub user_id: String,
    /// Bearer token for authenticated requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Display metadata from the identity provider
    #[serde(default)]
    pub profile: Profile,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: None,
            profile: Profile::default(),
        }
    }

    /// Builder method: set the display profile
    pub fn profile(mut self, full_name: impl Into<String>, avatar_url: impl Into<String>) -> Self {
        let avatar_url = avatar_url.into();
        self.profile = Profile {
            full_name: Some(full_name.into()),
            avatar_url: if avatar_url.is_empty() {
                None
            } else {
                Some(avatar_url)
            },
        };
        self
    }

    /// Builder method: set the access token
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

/// Display metadata for the signed-in person
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Supported OAuth identity providers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthProvider {
    Google,
}

impl std::fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthProvider::Google => write!(f, "google"),
        }
    }
}

/// Outcome of starting an OAuth sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignIn {
    /// The backend signed the person in directly
    Complete(Session),
    /// The person must finish the flow in a browser
    Redirect { url: String },
}

/// Opaque handle identifying a push subscription
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub String);

impl std::fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open push subscription
pub struct Subscription {
    /// Handle to pass back to [`Provider::unsubscribe`]
    pub handle: SubscriptionHandle,
    /// Change events in delivery order
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Build the backend selected by `config`
pub async fn from_config(config: &Config) -> ProviderResult<Arc<dyn Provider>> {
    match config.backend.kind {
        BackendKind::Memory => {
            let identity = Session::new(config.demo.user_id.clone())
                .profile(config.demo.full_name.clone(), config.demo.avatar_url.clone());
            tracing::info!(user_id = %identity.user_id, "Using in-memory backend");
            Ok(Arc::new(MemoryProvider::new(identity)))
        }
        BackendKind::Rest => {
            let provider = RestProvider::new(RestConfig::from(config))?;
            if let Some(token) = config.backend.access_token.as_deref().filter(|t| !t.is_empty()) {
                match provider.restore_session(token).await {
                    Ok(Some(session)) => {
                        tracing::info!(user_id = %session.user_id, "Restored session");
                    }
                    Ok(None) => tracing::warn!("Stored access token was not accepted"),
                    Err(e) => tracing::warn!(error = %e, "Failed to restore session"),
                }
            }
            tracing::info!(url = %config.backend.url, "Using hosted backend");
            Ok(Arc::new(provider))
        }
    }
}
