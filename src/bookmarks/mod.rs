//! Bookmarks
//!
//! Client-side bookmark state for one signed-in owner.
//!
//! ## Architecture
//!
//! - **BookmarkList**: immutable newest-first snapshot; every change derives a
//!   new list
//! - **Reconciler**: seeds the list from a query and keeps it live from push
//!   events; owns the optimistic delete
//! - **BookmarkForm**: validates and submits new bookmarks

mod error;
mod form;
mod list;
mod reconciler;
mod types;

pub use error::{
    BookmarkError, BookmarkResult, ADD_FAILED_MESSAGE, DELETE_FAILED_MESSAGE,
    REQUIRED_FIELDS_MESSAGE,
};
pub use form::{BookmarkForm, FormFields, FormView, OnAdded};
pub use list::BookmarkList;
pub use reconciler::{ListState, Reconciler, ReconcilerOptions, Reconciliation, Removal};
pub use types::{BookmarkId, BookmarkRecord, ChangeEvent, NewBookmark, OwnerId, BOOKMARKS_TABLE};
