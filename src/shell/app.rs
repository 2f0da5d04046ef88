//! Shell composition
//!
//! Binds the session to a reconciler and a form. Whenever the owner id
//! changes (sign-in, sign-out, account switch) the old reconciler is torn
//! down, releasing its push subscription, and a fresh one is started.

use std::sync::Arc;
use tokio::sync::watch;

use super::screen::Screen;
use crate::bookmarks::{
    BookmarkError, BookmarkForm, BookmarkId, BookmarkRecord, BookmarkResult, ListState,
    Reconciler, ReconcilerOptions,
};
use crate::provider::{OAuthProvider, Provider, ProviderResult, Session, SignIn};
use crate::session::SessionResolver;

/// Reconciler and form for the signed-in owner
struct Bound {
    reconciler: Reconciler,
    form: Arc<BookmarkForm>,
}

/// Signed-out / signed-in view over one backend
pub struct Shell {
    provider: Arc<dyn Provider>,
    resolver: SessionResolver,
    options: ReconcilerOptions,
    session_rx: watch::Receiver<Option<Session>>,
    session: Option<Session>,
    loaded: bool,
    bound: Option<Bound>,
}

impl Shell {
    pub fn new(provider: Arc<dyn Provider>, options: ReconcilerOptions) -> Self {
        let session_rx = provider.on_session_change();
        Self {
            resolver: SessionResolver::new(Arc::clone(&provider)),
            provider,
            options,
            session_rx,
            session: None,
            loaded: false,
            bound: None,
        }
    }

    /// Resolve the initial session and bind to it
    pub async fn start(&mut self) {
        self.session_rx.borrow_and_update();
        let session = self.resolver.resolve().await;
        self.loaded = true;
        self.bind(session).await;
    }

    /// Receiver that fires on sign-in and sign-out
    pub fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.session_rx.clone()
    }

    /// Wait for the next session change and apply it.
    ///
    /// Returns false once the backend stops reporting changes.
    pub async fn next_session_change(&mut self) -> bool {
        if self.session_rx.changed().await.is_err() {
            return false;
        }
        let session = self.session_rx.borrow_and_update().clone();
        self.apply_session(session).await;
        true
    }

    /// Adopt a session reported by the backend
    pub async fn apply_session(&mut self, session: Option<Session>) {
        let session = match session {
            Some(session) => Some(session),
            None => self.resolver.resolve().await,
        };
        self.bind(session).await;
    }

    async fn bind(&mut self, session: Option<Session>) {
        let new_owner = session.as_ref().map(|s| s.user_id.clone());
        self.session = session;

        if self.owner() == new_owner.as_deref() {
            return;
        }

        if let Some(old) = self.bound.take() {
            tracing::info!(owner_id = %old.reconciler.owner(), "Releasing bookmark list");
            old.reconciler.shutdown().await;
        }

        if let Some(owner) = new_owner {
            let reconciler =
                Reconciler::spawn(Arc::clone(&self.provider), owner.clone(), self.options.clone());
            let form = Arc::new(BookmarkForm::new(Arc::clone(&self.provider), owner));
            self.bound = Some(Bound { reconciler, form });
        }
    }

    /// Owner currently bound, if signed in
    pub fn owner(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.reconciler.owner())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Form of the signed-in owner
    pub fn form(&self) -> Option<Arc<BookmarkForm>> {
        self.bound.as_ref().map(|b| Arc::clone(&b.form))
    }

    /// Receiver for the signed-in owner's list
    pub fn list_changes(&self) -> Option<watch::Receiver<ListState>> {
        self.bound.as_ref().map(|b| b.reconciler.watch())
    }

    /// Start Google sign-in. A completed sign-in is bound immediately.
    pub async fn sign_in(&mut self) -> ProviderResult<SignIn> {
        let outcome = self.provider.sign_in_with_oauth(OAuthProvider::Google).await?;
        if let SignIn::Complete(session) = &outcome {
            self.bind(Some(session.clone())).await;
        }
        Ok(outcome)
    }

    /// Sign out and drop the signed-in owner's list
    pub async fn sign_out(&mut self) -> ProviderResult<()> {
        self.provider.sign_out().await?;
        self.bind(None).await;
        Ok(())
    }

    /// Fill the form and submit it
    pub async fn add(&self, title: &str, url: &str) -> BookmarkResult<BookmarkRecord> {
        let form = self.form().ok_or(BookmarkError::Closed)?;
        form.fill(title, url).await;
        form.submit().await
    }

    /// Delete a bookmark from the signed-in owner's list
    pub async fn delete(&self, id: &str) -> BookmarkResult<()> {
        let bound = self.bound.as_ref().ok_or(BookmarkError::Closed)?;
        bound.reconciler.delete(id).await
    }

    /// Id of the bookmark shown at 1-based `position`
    pub fn bookmark_at(&self, position: usize) -> Option<BookmarkId> {
        let state = self.bound.as_ref()?.reconciler.state();
        let list = state.list()?;
        position
            .checked_sub(1)
            .and_then(|i| list.as_slice().get(i))
            .map(|r| r.id.clone())
    }

    /// Snapshot of what should be on screen
    pub async fn render(&self) -> Screen {
        if !self.loaded {
            return Screen::Loading;
        }

        match (&self.session, &self.bound) {
            (Some(session), Some(bound)) => Screen::SignedIn {
                profile: session.profile.clone(),
                form: bound.form.view().await,
                list: bound.reconciler.state(),
            },
            _ => Screen::SignedOut,
        }
    }

    /// Release the bound list and its subscription
    pub async fn shutdown(mut self) {
        if let Some(bound) = self.bound.take() {
            bound.reconciler.shutdown().await;
        }
        tracing::debug!("Shell closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmarks::NewBookmark;
    use crate::provider::MemoryProvider;

    async fn ready_list(shell: &Shell) -> crate::bookmarks::BookmarkList {
        let mut rx = shell.list_changes().expect("signed in");
        let state = rx.wait_for(|s| !s.is_loading()).await.unwrap().clone();
        state.list().cloned().expect("list should be ready")
    }

    #[tokio::test]
    async fn test_loading_then_signed_out() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1")));
        let mut shell = Shell::new(memory.clone(), ReconcilerOptions::default());
        assert_eq!(shell.render().await, Screen::Loading);

        shell.start().await;
        assert_eq!(shell.render().await, Screen::SignedOut);
        assert_eq!(shell.owner(), None);
    }

    #[tokio::test]
    async fn test_sign_in_add_and_sign_out() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1").profile("Ada", "")));
        let mut shell = Shell::new(memory.clone(), ReconcilerOptions::default());
        shell.start().await;

        assert!(matches!(shell.sign_in().await.unwrap(), SignIn::Complete(_)));
        assert_eq!(shell.owner(), Some("u1"));
        assert!(ready_list(&shell).await.is_empty());

        let record = shell.add("Docs", "example.com/docs").await.unwrap();
        let mut rx = shell.list_changes().unwrap();
        rx.wait_for(|s| s.list().map(|l| l.contains(&record.id)).unwrap_or(false))
            .await
            .unwrap();
        assert_eq!(shell.bookmark_at(1), Some(record.id.clone()));
        assert_eq!(shell.bookmark_at(0), None);
        assert_eq!(shell.bookmark_at(2), None);

        match shell.render().await {
            Screen::SignedIn { profile, form, .. } => {
                assert_eq!(profile.full_name.as_deref(), Some("Ada"));
                assert!(form.fields.title.is_empty());
            }
            other => panic!("Expected signed in, got {:?}", other),
        }

        shell.sign_out().await.unwrap();
        assert_eq!(shell.render().await, Screen::SignedOut);
        assert_eq!(memory.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_owner_change_rebinds() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1")).signed_in());
        memory
            .insert(NewBookmark::trimmed("Mine", "mine.com", "u1"))
            .await
            .unwrap();
        memory.switch_session(Some(Session::new("u2")));
        memory
            .insert(NewBookmark::trimmed("Theirs", "theirs.com", "u2"))
            .await
            .unwrap();
        memory.switch_session(Some(Session::new("u1")));

        let mut shell = Shell::new(memory.clone(), ReconcilerOptions::default());
        shell.start().await;
        let list = ready_list(&shell).await;
        assert_eq!(list.as_slice()[0].title, "Mine");
        assert_eq!(memory.owner_subscription_count("u1").await, 1);

        memory.switch_session(Some(Session::new("u2")));
        assert!(shell.next_session_change().await);

        assert_eq!(shell.owner(), Some("u2"));
        assert_eq!(memory.owner_subscription_count("u1").await, 0);

        let list = ready_list(&shell).await;
        let titles: Vec<_> = list.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Theirs"]);
        assert!(list.iter().all(|r| r.user_id == "u2"));

        shell.shutdown().await;
        assert_eq!(memory.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_same_owner_keeps_list() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1")).signed_in());
        let mut shell = Shell::new(memory.clone(), ReconcilerOptions::default());
        shell.start().await;
        ready_list(&shell).await;

        // Token refresh: same owner, new session object
        shell
            .apply_session(Some(Session::new("u1").access_token("refreshed")))
            .await;
        assert_eq!(memory.owner_subscription_count("u1").await, 1);

        shell.shutdown().await;
    }

    #[tokio::test]
    async fn test_two_shells_share_changes() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1")).signed_in());
        let mut first = Shell::new(memory.clone(), ReconcilerOptions::default());
        let mut second = Shell::new(memory.clone(), ReconcilerOptions::default());
        first.start().await;
        second.start().await;
        ready_list(&first).await;
        ready_list(&second).await;

        let record = first.add("Docs", "example.com/docs").await.unwrap();
        let mut rx = second.list_changes().unwrap();
        rx.wait_for(|s| s.list().map(|l| l.contains(&record.id)).unwrap_or(false))
            .await
            .unwrap();

        second.delete(&record.id).await.unwrap();
        let mut rx = first.list_changes().unwrap();
        rx.wait_for(|s| s.list().map(|l| l.is_empty()).unwrap_or(false))
            .await
            .unwrap();

        first.shutdown().await;
        second.shutdown().await;
        assert_eq!(memory.subscription_count().await, 0);
    }

    #[tokio::test]
    async fn test_signed_out_actions_are_rejected() {
        let memory = Arc::new(MemoryProvider::new(Session::new("u1")));
        let mut shell = Shell::new(memory.clone(), ReconcilerOptions::default());
        shell.start().await;

        assert!(matches!(
            shell.add("Docs", "example.com").await,
            Err(BookmarkError::Closed)
        ));
        assert!(matches!(shell.delete("b-1").await, Err(BookmarkError::Closed)));
        assert_eq!(memory.row_count().await, 0);
    }
}
