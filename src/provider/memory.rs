//! In-memory backend
//!
//! Keeps rows in a map, assigns ids and creation timestamps the way the
//! hosted store does, and pushes every change through a [`ChangeHub`].
//! Failures and latency can be injected to exercise error paths.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use uuid::Uuid;

use super::error::{ProviderError, ProviderResult};
use super::hub::ChangeHub;
use super::{OAuthProvider, Provider, Session, SignIn, Subscription, SubscriptionHandle};
use crate::bookmarks::{BookmarkId, BookmarkRecord, ChangeEvent, NewBookmark};

/// Backend operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetSession,
    Query,
    Insert,
    Update,
    Delete,
    Subscribe,
    SignIn,
    SignOut,
}

/// In-process stand-in for the hosted backend
pub struct MemoryProvider {
    /// Stored rows: BookmarkId → BookmarkRecord
    rows: RwLock<HashMap<BookmarkId, BookmarkRecord>>,
    /// Identity used when signing in
    identity: Session,
    /// Current session, observed by `on_session_change`
    session_tx: watch::Sender<Option<Session>>,
    /// Realtime fan-out
    hub: ChangeHub,
    /// One-shot failures keyed by operation
    faults: Mutex<HashMap<Operation, String>>,
    /// Simulated round-trip delay
    latency: Mutex<Option<Duration>>,
    /// Last assigned creation time, kept strictly increasing
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryProvider {
    /// Create a signed-out backend that signs in as `identity`
    pub fn new(identity: Session) -> Self {
        let (session_tx, _) = watch::channel(None);

        Self {
            rows: RwLock::new(HashMap::new()),
            identity,
            session_tx,
            hub: ChangeHub::default(),
            faults: Mutex::new(HashMap::new()),
            latency: Mutex::new(None),
            last_created: Mutex::new(None),
        }
    }

    /// Builder method: start with `identity` already signed in
    pub fn signed_in(self) -> Self {
        self.session_tx.send_replace(Some(self.identity.clone()));
        self
    }

    /// Make the next call of `op` fail with `message`
    pub async fn fail_next(&self, op: Operation, message: impl Into<String>) {
        self.faults.lock().await.insert(op, message.into());
    }

    /// Delay every data operation by `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().await = latency;
    }

    /// Switch the signed-in identity, as if another account signed in
    pub fn switch_session(&self, session: Option<Session>) {
        self.session_tx.send_replace(session);
    }

    /// Change a stored row, as another client would
    pub async fn update(
        &self,
        id: &str,
        title: impl Into<String>,
        url: impl Into<String>,
    ) -> ProviderResult<BookmarkRecord> {
        self.check(Operation::Update).await?;

        let record = {
            let mut rows = self.rows.write().await;
            let record = rows
                .get_mut(id)
                .ok_or_else(|| ProviderError::api(404, format!("Bookmark {} not found", id)))?;
            record.title = title.into();
            record.url = url.into();
            record.clone()
        };

        self.hub
            .publish(&record.user_id, &ChangeEvent::Updated(record.clone()))
            .await;
        Ok(record)
    }

    /// Number of stored rows across all owners
    pub async fn row_count(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Number of open push subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.hub.subscription_count().await
    }

    /// Number of open push subscriptions for `owner`
    pub async fn owner_subscription_count(&self, owner: &str) -> usize {
        self.hub.owner_subscription_count(owner).await
    }

    /// Apply injected latency and failures for `op`
    async fn check(&self, op: Operation) -> ProviderResult<()> {
        let latency = *self.latency.lock().await;
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }

        match self.faults.lock().await.remove(&op) {
            Some(message) => {
                tracing::debug!(operation = ?op, "Injected failure");
                Err(ProviderError::rejected(message))
            }
            None => Ok(()),
        }
    }

    /// Owner the current session acts as
    fn session_owner(&self) -> Option<String> {
        self.session_tx.borrow().as_ref().map(|s| s.user_id.clone())
    }

    async fn next_created_at(&self) -> DateTime<Utc> {
        let mut last = self.last_created.lock().await;
        let mut now = Utc::now();
        if let Some(prev) = *last {
            if now <= prev {
                now = prev + ChronoDuration::microseconds(1);
            }
        }
        *last = Some(now);
        now
    }
}

#[async_trait]
impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get_session(&self) -> ProviderResult<Option<Session>> {
        self.check(Operation::GetSession).await?;
        Ok(self.session_tx.borrow().clone())
    }

    async fn lookup_user(&self) -> ProviderResult<Option<Session>> {
        Ok(self.session_tx.borrow().clone())
    }

    fn on_session_change(&self) -> watch::Receiver<Option<Session>> {
        self.session_tx.subscribe()
    }

    async fn sign_in_with_oauth(&self, provider: OAuthProvider) -> ProviderResult<SignIn> {
        self.check(Operation::SignIn).await?;

        tracing::info!(oauth_provider = %provider, user_id = %self.identity.user_id, "Signed in");
        self.session_tx.send_replace(Some(self.identity.clone()));
        Ok(SignIn::Complete(self.identity.clone()))
    }

    async fn sign_out(&self) -> ProviderResult<()> {
        self.check(Operation::SignOut).await?;

        self.session_tx.send_replace(None);
        tracing::info!("Signed out");
        Ok(())
    }

    async fn query(&self, owner: &str) -> ProviderResult<Vec<BookmarkRecord>> {
        self.check(Operation::Query).await?;

        // Rows are only visible to their owner's session
        if self.session_owner().as_deref() != Some(owner) {
            return Ok(Vec::new());
        }

        let mut rows: Vec<BookmarkRecord> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.is_owned_by(owner))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert(&self, row: NewBookmark) -> ProviderResult<BookmarkRecord> {
        self.check(Operation::Insert).await?;

        if row.title.is_empty() || row.url.is_empty() {
            return Err(ProviderError::api(
                400,
                "null value in column violates not-null constraint",
            ));
        }
        if self.session_owner().as_deref() != Some(row.user_id.as_str()) {
            return Err(ProviderError::api(
                403,
                "new row violates row-level security policy for table \"bookmarks\"",
            ));
        }

        let record = BookmarkRecord {
            id: Uuid::new_v4().to_string(),
            title: row.title,
            url: row.url,
            user_id: row.user_id,
            created_at: self.next_created_at().await,
        };

        self.rows
            .write()
            .await
            .insert(record.id.clone(), record.clone());

        tracing::debug!(bookmark_id = %record.id, owner_id = %record.user_id, "Row inserted");
        self.hub
            .publish(&record.user_id, &ChangeEvent::Inserted(record.clone()))
            .await;
        Ok(record)
    }

    async fn delete(&self, id: &str) -> ProviderResult<()> {
        self.check(Operation::Delete).await?;

        // Missing and foreign rows match nothing, which is not an error
        let owner = self.session_owner();
        let removed = {
            let mut rows = self.rows.write().await;
            match rows.get(id) {
                Some(row) if owner.as_deref() == Some(row.user_id.as_str()) => rows.remove(id),
                _ => None,
            }
        };
        if let Some(record) = removed {
            tracing::debug!(bookmark_id = %id, "Row deleted");
            self.hub
                .publish(
                    &record.user_id,
                    &ChangeEvent::Deleted {
                        id: record.id.clone(),
                    },
                )
                .await;
        }
        Ok(())
    }

    async fn subscribe_changes(&self, owner: &str) -> ProviderResult<Subscription> {
        self.check(Operation::Subscribe).await?;

        let (handle, events) = self.hub.register(owner).await?;
        Ok(Subscription { handle, events })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> ProviderResult<()> {
        self.hub.unregister(&handle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> MemoryProvider {
        MemoryProvider::new(Session::new("u1").profile("Ada", "")).signed_in()
    }

    #[tokio::test]
    async fn test_insert_assigns_id_and_time() {
        let provider = provider();
        let first = provider
            .insert(NewBookmark::trimmed("A", "a.com", "u1"))
            .await
            .unwrap();
        let second = provider
            .insert(NewBookmark::trimmed("B", "b.com", "u1"))
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert!(second.created_at > first.created_at);
        assert_eq!(provider.row_count().await, 2);
    }

    #[tokio::test]
    async fn test_query_filters_owner_newest_first() {
        let provider = provider();
        provider
            .insert(NewBookmark::trimmed("A", "a.com", "u1"))
            .await
            .unwrap();
        provider.switch_session(Some(Session::new("u2")));
        provider
            .insert(NewBookmark::trimmed("Other", "o.com", "u2"))
            .await
            .unwrap();
        provider.switch_session(Some(Session::new("u1")));
        provider
            .insert(NewBookmark::trimmed("B", "b.com", "u1"))
            .await
            .unwrap();

        let rows = provider.query("u1").await.unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn test_subscription_receives_changes() {
        let provider = provider();
        let mut sub = provider.subscribe_changes("u1").await.unwrap();

        let record = provider
            .insert(NewBookmark::trimmed("A", "a.com", "u1"))
            .await
            .unwrap();
        provider.update(&record.id, "A2", "a2.com").await.unwrap();
        provider.delete(&record.id).await.unwrap();

        assert!(matches!(sub.events.recv().await, Some(ChangeEvent::Inserted(_))));
        match sub.events.recv().await {
            Some(ChangeEvent::Updated(r)) => assert_eq!(r.title, "A2"),
            other => panic!("Expected Updated, got {:?}", other),
        }
        assert_eq!(
            sub.events.recv().await,
            Some(ChangeEvent::Deleted { id: record.id })
        );

        provider.unsubscribe(sub.handle).await.unwrap();
        assert_eq!(provider.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_rows_are_scoped_to_session_owner() {
        let provider = provider();
        provider.switch_session(Some(Session::new("u2")));
        let theirs = provider
            .insert(NewBookmark::trimmed("Theirs", "t.com", "u2"))
            .await
            .unwrap();
        provider.switch_session(Some(Session::new("u1")));

        // Foreign rows are invisible and cannot be deleted
        assert!(provider.query("u2").await.unwrap().is_empty());
        provider.delete(&theirs.id).await.unwrap();
        assert_eq!(provider.row_count().await, 1);

        // Rows cannot be written on someone else's behalf
        let err = provider
            .insert(NewBookmark::trimmed("Sneaky", "s.com", "u2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 403, .. }));

        provider.switch_session(None);
        assert!(provider
            .insert(NewBookmark::trimmed("Anon", "a.com", "u1"))
            .await
            .is_err());
        assert_eq!(provider.row_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let provider = provider();
        provider.fail_next(Operation::Insert, "insert blocked").await;

        let err = provider
            .insert(NewBookmark::trimmed("A", "a.com", "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "insert blocked");

        assert!(provider
            .insert(NewBookmark::trimmed("A", "a.com", "u1"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let provider = MemoryProvider::new(Session::new("u1"));
        let mut changes = provider.on_session_change();
        assert!(provider.get_session().await.unwrap().is_none());

        let outcome = provider.sign_in_with_oauth(OAuthProvider::Google).await.unwrap();
        assert_eq!(outcome, SignIn::Complete(Session::new("u1")));
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow().as_ref().map(|s| s.user_id.as_str()), Some("u1"));

        provider.sign_out().await.unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
    }
}
