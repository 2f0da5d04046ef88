//! Bookmark List Reconciler
//!
//! Keeps one owner's bookmark list live: seeded by an initial query and
//! updated by push events from the backend.
//!
//! ## State machine
//!
//! ```text
//!            query ok
//! Loading ───────────────► Ready ◄── push events, local deletes
//!    │
//!    │ query failed
//!    ▼
//! Errored
//! ```
//!
//! The subscription is opened before the query is issued, so events can
//! arrive while still `Loading`. Those are buffered and replayed on top of the
//! snapshot; every apply rule is idempotent per id, so replaying an event the
//! snapshot already reflects is harmless.
//!
//! [`Reconciliation`] is the pure state machine. [`Reconciler`] runs it in a
//! tokio task that is the only writer of the list and publishes every new
//! state through a `watch` channel.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::error::{BookmarkError, BookmarkResult};
use super::list::BookmarkList;
use super::types::{BookmarkId, BookmarkRecord, ChangeEvent, OwnerId};
use crate::provider::{Provider, ProviderError, ProviderResult, Subscription};

/// Observable state of one owner's list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListState {
    /// Initial query in flight
    Loading,
    /// List materialized and kept live
    Ready(BookmarkList),
    /// Initial query failed; carries the backend's message
    Errored(String),
}

impl ListState {
    /// The list, if ready
    pub fn list(&self) -> Option<&BookmarkList> {
        match self {
            ListState::Ready(list) => Some(list),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ListState::Loading)
    }
}

/// A local optimistic removal, kept so it can be undone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub index: usize,
    pub record: BookmarkRecord,
}

/// Pure reconciliation state for one owner
#[derive(Debug, Clone)]
pub struct Reconciliation {
    owner: OwnerId,
    state: ListState,
    /// Events received before the snapshot
    pending: Vec<ChangeEvent>,
}

impl Reconciliation {
    /// Start in `Loading` for `owner`
    pub fn new(owner: impl Into<OwnerId>) -> Self {
        Self {
            owner: owner.into(),
            state: ListState::Loading,
            pending: Vec::new(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    /// Number of events waiting for the snapshot
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Handle the initial query result. Returns true if the state changed.
    pub fn on_snapshot(&mut self, result: ProviderResult<Vec<BookmarkRecord>>) -> bool {
        if !self.state.is_loading() {
            return false;
        }

        match result {
            Ok(rows) => {
                let owner = &self.owner;
                let total = rows.len();
                let rows: Vec<_> = rows.into_iter().filter(|r| r.is_owned_by(owner)).collect();
                if rows.len() != total {
                    tracing::warn!(
                        owner_id = %owner,
                        dropped = total - rows.len(),
                        "Query returned rows for another owner"
                    );
                }

                let mut list = BookmarkList::from_rows(rows);
                for event in std::mem::take(&mut self.pending) {
                    if let Some(next) = list.apply(&event) {
                        list = next;
                    }
                }

                tracing::debug!(owner_id = %self.owner, rows = list.len(), "Bookmark list ready");
                self.state = ListState::Ready(list);
            }
            Err(e) => {
                let message = e.user_message_or("Failed to load bookmarks.");
                tracing::warn!(owner_id = %self.owner, error = %e, "Initial bookmark query failed");
                self.pending.clear();
                self.state = ListState::Errored(message);
            }
        }
        true
    }

    /// Apply a push event. Returns true if the list changed.
    ///
    /// Post-images for another owner are dropped. While loading, events are
    /// buffered; once errored, they are discarded.
    pub fn on_event(&mut self, event: ChangeEvent) -> bool {
        if let Some(record) = event.record() {
            if !record.is_owned_by(&self.owner) {
                tracing::warn!(
                    owner_id = %self.owner,
                    bookmark_id = %record.id,
                    "Dropping change for another owner"
                );
                return false;
            }
        }

        match &self.state {
            ListState::Loading => {
                self.pending.push(event);
                false
            }
            ListState::Ready(list) => match list.apply(&event) {
                Some(next) => {
                    self.state = ListState::Ready(next);
                    true
                }
                None => {
                    tracing::trace!(kind = event.kind(), bookmark_id = %event.id(), "Change was a no-op");
                    false
                }
            },
            ListState::Errored(_) => false,
        }
    }

    /// Remove `id` from the list ahead of the backend confirming it.
    ///
    /// While loading, the removal is queued like a push delete so the
    /// snapshot cannot bring the row back.
    pub fn remove_local(&mut self, id: &str) -> Option<Removal> {
        match &self.state {
            ListState::Ready(list) => {
                let (next, index, record) = list.with_removed(id)?;
                self.state = ListState::Ready(next);
                Some(Removal { index, record })
            }
            ListState::Loading => {
                self.pending.push(ChangeEvent::Deleted { id: id.to_string() });
                None
            }
            ListState::Errored(_) => None,
        }
    }

    /// Undo an optimistic removal. Returns true if the list changed.
    pub fn restore(&mut self, removal: Removal) -> bool {
        let ListState::Ready(list) = &self.state else {
            return false;
        };

        match list.with_restored(removal.index, removal.record) {
            Some(next) => {
                self.state = ListState::Ready(next);
                true
            }
            None => false,
        }
    }
}

/// Options for a running reconciler
#[derive(Debug, Clone, Default)]
pub struct ReconcilerOptions {
    /// Put a bookmark back when its delete request fails
    pub rollback_failed_deletes: bool,
}

enum Command {
    Delete {
        id: BookmarkId,
        reply: oneshot::Sender<BookmarkResult<()>>,
    },
    Shutdown,
}

struct DeleteOutcome {
    removal: Option<Removal>,
    result: ProviderResult<()>,
    reply: oneshot::Sender<BookmarkResult<()>>,
}

/// Running reconciler bound to one owner
///
/// Dropping the handle releases the push subscription in the background;
/// [`shutdown`](Self::shutdown) does the same and waits for it.
pub struct Reconciler {
    owner: OwnerId,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ListState>,
    task: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Start reconciling `owner`'s bookmarks.
    ///
    /// Opens the push subscription, then issues the initial query.
    pub fn spawn(provider: Arc<dyn Provider>, owner: impl Into<OwnerId>, options: ReconcilerOptions) -> Self {
        let owner = owner.into();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ListState::Loading);

        let driver = Driver {
            provider,
            machine: Reconciliation::new(owner.clone()),
            state_tx,
            options,
        };
        let task = tokio::spawn(driver.run(command_rx));

        tracing::info!(owner_id = %owner, "Reconciler started");
        Self {
            owner,
            commands,
            state_rx,
            task: Some(task),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Current state
    pub fn state(&self) -> ListState {
        self.state_rx.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn watch(&self) -> watch::Receiver<ListState> {
        self.state_rx.clone()
    }

    /// Delete a bookmark: removed locally at once, then deleted on the backend.
    ///
    /// A later push delete for the same id is a no-op. On failure the error is
    /// returned for the caller to alert on; the local removal stays unless
    /// `rollback_failed_deletes` is set.
    pub async fn delete(&self, id: &str) -> BookmarkResult<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Delete {
                id: id.to_string(),
                reply,
            })
            .map_err(|_| BookmarkError::Closed)?;

        rx.await.map_err(|_| BookmarkError::Closed)?
    }

    /// Release the subscription and stop the task
    pub async fn shutdown(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        if self.task.is_some() {
            // The task releases the subscription when it sees this
            let _ = self.commands.send(Command::Shutdown);
        }
    }
}

struct Driver {
    provider: Arc<dyn Provider>,
    machine: Reconciliation,
    state_tx: watch::Sender<ListState>,
    options: ReconcilerOptions,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let owner = self.machine.owner().to_string();

        // Subscribe first so nothing committed after the snapshot read is missed;
        // events arriving before the snapshot are buffered
        let subscription = match self.provider.subscribe_changes(&owner).await {
            Ok(subscription) => Some(subscription),
            Err(e) => {
                tracing::warn!(owner_id = %owner, error = %e, "Push subscription failed; list will not update live");
                None
            }
        };
        let (handle, mut events) = match subscription {
            Some(Subscription { handle, events }) => (Some(handle), Some(events)),
            None => (None, None),
        };

        let mut query = {
            let provider = Arc::clone(&self.provider);
            let owner = owner.clone();
            tokio::spawn(async move { provider.query(&owner).await })
        };
        let mut query_done = false;

        let (outcome_tx, mut outcomes) = mpsc::unbounded_channel::<DeleteOutcome>();

        loop {
            tokio::select! {
                result = &mut query, if !query_done => {
                    query_done = true;
                    let result = result.unwrap_or_else(|e| {
                        Err(ProviderError::rejected(format!("query task failed: {}", e)))
                    });
                    if self.machine.on_snapshot(result) {
                        self.publish();
                    }
                }
                event = recv_event(&mut events) => {
                    match event {
                        Some(event) => {
                            if self.machine.on_event(event) {
                                self.publish();
                            }
                        }
                        None => {
                            tracing::warn!(owner_id = %owner, "Push channel closed");
                            events = None;
                        }
                    }
                }
                Some(outcome) = outcomes.recv() => {
                    self.finish_delete(outcome);
                }
                command = commands.recv() => {
                    match command {
                        Some(Command::Delete { id, reply }) => {
                            self.start_delete(id, reply, outcome_tx.clone());
                        }
                        Some(Command::Shutdown) | None => break,
                    }
                }
            }
        }

        // Late completions must not touch a torn-down list
        query.abort();
        drop(events);

        if let Some(handle) = handle {
            if let Err(e) = self.provider.unsubscribe(handle).await {
                tracing::warn!(owner_id = %owner, error = %e, "Failed to release push subscription");
            }
        }
        tracing::info!(owner_id = %owner, "Reconciler stopped");
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.machine.state().clone());
    }

    fn start_delete(
        &mut self,
        id: BookmarkId,
        reply: oneshot::Sender<BookmarkResult<()>>,
        outcome_tx: mpsc::UnboundedSender<DeleteOutcome>,
    ) {
        let removal = self.machine.remove_local(&id);
        if removal.is_some() {
            self.publish();
        }

        let provider = Arc::clone(&self.provider);
        tokio::spawn(async move {
            let result = provider.delete(&id).await;
            let _ = outcome_tx.send(DeleteOutcome {
                removal,
                result,
                reply,
            });
        });
    }

    fn finish_delete(&mut self, outcome: DeleteOutcome) {
        let DeleteOutcome {
            removal,
            result,
            reply,
        } = outcome;

        if let Err(e) = &result {
            tracing::warn!(error = %e, "Delete request failed");
            if self.options.rollback_failed_deletes {
                if let Some(removal) = removal {
                    if self.machine.restore(removal) {
                        self.publish();
                    }
                }
            }
        }

        let _ = reply.send(result.map_err(BookmarkError::from));
    }
}

/// Next push event, or pending forever when there is no subscription
async fn recv_event(
    events: &mut Option<mpsc::UnboundedReceiver<ChangeEvent>>,
) -> Option<ChangeEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
