//! Session Resolver
//!
//! Works out who is signed in. Absence is a normal outcome that renders the
//! signed-out screen, so lookups never fail: backend errors are logged and
//! treated as "no session".

use std::sync::Arc;

use crate::bookmarks::OwnerId;
use crate::provider::{Provider, Session};

/// Resolves the current owner from the backend
#[derive(Clone)]
pub struct SessionResolver {
    provider: Arc<dyn Provider>,
}

impl SessionResolver {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Active session first, then the secondary user lookup. No retries.
    pub async fn resolve(&self) -> Option<Session> {
        match self.provider.get_session().await {
            Ok(Some(session)) => return Some(session),
            Ok(None) => {}
            Err(e) => tracing::debug!(error = %e, "Session lookup failed"),
        }

        match self.provider.lookup_user().await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(error = %e, "Fallback user lookup failed");
                None
            }
        }
    }

    /// Owner id of the signed-in person, if any
    pub async fn resolve_owner_id(&self) -> Option<OwnerId> {
        self.resolve().await.map(|s| s.user_id)
    }
}
