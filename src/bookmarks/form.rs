//! Bookmark Submission Handler
//!
//! Holds the transient title/url fields of the add-bookmark form, validates
//! them and forwards the insert to the backend. One submission may be in
//! flight per form; further attempts are rejected until it completes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::error::{BookmarkError, BookmarkResult, ADD_FAILED_MESSAGE, REQUIRED_FIELDS_MESSAGE};
use super::types::{BookmarkRecord, NewBookmark, OwnerId};
use crate::provider::Provider;

/// Callback invoked after a bookmark was stored
pub type OnAdded = Box<dyn Fn(&BookmarkRecord) + Send + Sync>;

/// Current contents of the form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormFields {
    pub title: String,
    pub url: String,
    /// Inline error from the last attempt
    pub error: Option<String>,
}

/// Snapshot of the form for rendering
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormView {
    pub fields: FormFields,
    pub saving: bool,
}

impl FormView {
    /// Label of the submit control
    pub fn button_label(&self) -> &'static str {
        if self.saving {
            "Saving..."
        } else {
            "Add"
        }
    }
}

/// Add-bookmark form bound to one owner
pub struct BookmarkForm {
    provider: Arc<dyn Provider>,
    owner: OwnerId,
    fields: Mutex<FormFields>,
    saving: AtomicBool,
    on_added: Option<OnAdded>,
}

/// Clears the in-flight flag however the submission ends
struct SavingGuard<'a>(&'a AtomicBool);

impl Drop for SavingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BookmarkForm {
    /// Create an empty form for `owner`
    pub fn new(provider: Arc<dyn Provider>, owner: impl Into<OwnerId>) -> Self {
        Self {
            provider,
            owner: owner.into(),
            fields: Mutex::new(FormFields::default()),
            saving: AtomicBool::new(false),
            on_added: None,
        }
    }

    /// Builder method: set the completion callback
    pub fn on_added(mut self, callback: impl Fn(&BookmarkRecord) + Send + Sync + 'static) -> Self {
        self.on_added = Some(Box::new(callback));
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether a submission is in flight
    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::Acquire)
    }

    /// Set both fields at once
    pub async fn fill(&self, title: impl Into<String>, url: impl Into<String>) {
        let mut fields = self.fields.lock().await;
        fields.title = title.into();
        fields.url = url.into();
    }

    pub async fn fields(&self) -> FormFields {
        self.fields.lock().await.clone()
    }

    pub async fn view(&self) -> FormView {
        FormView {
            fields: self.fields().await,
            saving: self.is_saving(),
        }
    }

    /// Validate the fields and insert the bookmark.
    ///
    /// - Blank title or url: `Validation`, nothing is sent, fields are kept.
    /// - Backend failure: the message becomes the inline error, fields are kept.
    /// - Success: fields are cleared and the completion callback runs.
    /// - Already saving: `Busy`, nothing else happens.
    pub async fn submit(&self) -> BookmarkResult<BookmarkRecord> {
        if self
            .saving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(owner_id = %self.owner, "Submit ignored while saving");
            return Err(BookmarkError::Busy);
        }
        let _saving = SavingGuard(&self.saving);

        let row = {
            let mut fields = self.fields.lock().await;
            fields.error = None;

            if fields.title.trim().is_empty() || fields.url.trim().is_empty() {
                fields.error = Some(REQUIRED_FIELDS_MESSAGE.to_string());
                return Err(BookmarkError::Validation(REQUIRED_FIELDS_MESSAGE.to_string()));
            }

            NewBookmark::trimmed(&fields.title, &fields.url, self.owner.clone())
        };

        match self.provider.insert(row).await {
            Ok(record) => {
                {
                    let mut fields = self.fields.lock().await;
                    fields.title.clear();
                    fields.url.clear();
                }
                tracing::info!(bookmark_id = %record.id, owner_id = %self.owner, "Bookmark added");

                if let Some(callback) = &self.on_added {
                    callback(&record);
                }
                Ok(record)
            }
            Err(e) => {
                let message = e.user_message_or(ADD_FAILED_MESSAGE);
                tracing::warn!(owner_id = %self.owner, error = %e, "Failed to add bookmark");
                self.fields.lock().await.error = Some(message);
                Err(BookmarkError::Provider(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bookmarks::{ListState, Reconciler, ReconcilerOptions};
    use crate::provider::{MemoryProvider, Operation, Session};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn memory() -> Arc<MemoryProvider> {
        Arc::new(MemoryProvider::new(Session::new("u1")).signed_in())
    }

    #[tokio::test]
    async fn test_submit_inserts_trimmed_row_and_resets() {
        let memory = memory();
        let added = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&added);
        let form = BookmarkForm::new(memory.clone(), "u1").on_added(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        form.fill("  Docs ", " example.com/docs ").await;
        let record = form.submit().await.unwrap();

        assert_eq!(record.title, "Docs");
        assert_eq!(record.url, "example.com/docs");
        assert_eq!(record.user_id, "u1");
        assert_eq!(form.fields().await, FormFields::default());
        assert_eq!(added.load(Ordering::SeqCst), 1);
        assert!(!form.is_saving());
    }

    #[tokio::test]
    async fn test_blank_title_is_rejected() {
        let memory = memory();
        let form = BookmarkForm::new(memory.clone(), "u1");

        form.fill("", "x.com").await;
        let err = form.submit().await.unwrap_err();

        assert!(matches!(err, BookmarkError::Validation(_)));
        assert_eq!(err.to_string(), "Both title and URL are required.");
        let fields = form.fields().await;
        assert_eq!(fields.url, "x.com");
        assert_eq!(fields.error.as_deref(), Some("Both title and URL are required."));
        assert_eq!(memory.row_count().await, 0);
    }

    #[tokio::test]
    async fn test_whitespace_only_is_rejected() {
        let memory = memory();
        let form = BookmarkForm::new(memory.clone(), "u1");

        form.fill("Docs", "   ").await;
        assert!(matches!(
            form.submit().await,
            Err(BookmarkError::Validation(_))
        ));
        assert_eq!(memory.row_count().await, 0);
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_fields() {
        let memory = memory();
        memory
            .fail_next(Operation::Insert, "new row violates row-level security policy")
            .await;
        let form = BookmarkForm::new(memory.clone(), "u1");

        form.fill("Docs", "example.com/docs").await;
        let err = form.submit().await.unwrap_err();

        assert!(matches!(err, BookmarkError::Provider(_)));
        let fields = form.fields().await;
        assert_eq!(fields.title, "Docs");
        assert_eq!(fields.url, "example.com/docs");
        assert_eq!(
            fields.error.as_deref(),
            Some("new row violates row-level security policy")
        );

        // Retrying without re-typing clears the error
        form.submit().await.unwrap();
        assert_eq!(form.fields().await.error, None);
    }

    #[tokio::test]
    async fn test_provider_failure_without_message_uses_fallback() {
        let memory = memory();
        memory.fail_next(Operation::Insert, "").await;
        let form = BookmarkForm::new(memory.clone(), "u1");

        form.fill("Docs", "example.com/docs").await;
        assert!(form.submit().await.is_err());
        assert_eq!(
            form.fields().await.error.as_deref(),
            Some("Failed to add bookmark.")
        );
    }

    #[tokio::test]
    async fn test_second_submit_rejected_while_saving() {
        let memory = memory();
        memory.set_latency(Some(Duration::from_millis(50))).await;
        let form = Arc::new(BookmarkForm::new(memory.clone(), "u1"));
        form.fill("Docs", "example.com/docs").await;

        let first = tokio::spawn({
            let form = Arc::clone(&form);
            async move { form.submit().await }
        });
        while !form.is_saving() {
            tokio::task::yield_now().await;
        }
        assert_eq!(form.view().await.button_label(), "Saving...");

        assert!(matches!(form.submit().await, Err(BookmarkError::Busy)));

        first.await.unwrap().unwrap();
        assert_eq!(memory.row_count().await, 1);
        assert_eq!(form.view().await.button_label(), "Add");
    }

    #[tokio::test]
    async fn test_submit_then_push_yields_single_record() {
        let memory = memory();
        let reconciler = Reconciler::spawn(memory.clone(), "u1", ReconcilerOptions::default());
        let mut rx = reconciler.watch();
        rx.wait_for(|s| !s.is_loading()).await.unwrap();

        let form = BookmarkForm::new(memory.clone(), "u1");
        form.fill("Docs", "example.com/docs").await;
        let record = form.submit().await.unwrap();

        let state = rx
            .wait_for(|s| s.list().map(|l| l.contains(&record.id)).unwrap_or(false))
            .await
            .unwrap()
            .clone();
        let ListState::Ready(list) = state else {
            panic!("list should be ready");
        };
        assert_eq!(list.iter().filter(|r| r.id == record.id).count(), 1);
        let head = &list.as_slice()[0];
        assert_eq!(
            (head.title.as_str(), head.url.as_str(), head.user_id.as_str()),
            ("Docs", "example.com/docs", "u1")
        );

        reconciler.shutdown().await;
    }
}
