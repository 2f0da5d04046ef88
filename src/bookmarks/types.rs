//! Core data types for bookmarks
//!
//! - `BookmarkRecord`: a stored bookmark row as the backend returns it
//! - `NewBookmark`: the row sent on insert
//! - `ChangeEvent`: a row-level change delivered by the push channel

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the authenticated person owning a set of bookmarks
pub type OwnerId = String;

/// Provider-assigned bookmark identifier
pub type BookmarkId = String;

/// Table holding bookmark rows
pub const BOOKMARKS_TABLE: &str = "bookmarks";

/// A stored bookmark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookmarkRecord {
    /// Opaque id assigned by the backend
    pub id: BookmarkId,
    /// Display title
    pub title: String,
    /// Target address, stored without a scheme prefix
    pub url: String,
    /// Owner of the row
    pub user_id: OwnerId,
    /// Creation time assigned by the backend
    pub created_at: DateTime<Utc>,
}

impl BookmarkRecord {
    /// Link used when rendering the bookmark
    pub fn href(&self) -> String {
        format!("https://{}", self.url)
    }

    /// Whether this row belongs to `owner`
    pub fn is_owned_by(&self, owner: &str) -> bool {
        self.user_id == owner
    }
}

/// Row sent to the backend when creating a bookmark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: OwnerId,
}

impl NewBookmark {
    /// Build an insert row from raw form input, trimming surrounding whitespace
    pub fn trimmed(title: &str, url: &str, user_id: impl Into<OwnerId>) -> Self {
        Self {
            title: title.trim().to_string(),
            url: url.trim().to_string(),
            user_id: user_id.into(),
        }
    }
}

/// A row-level change pushed by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// A row was created; carries the post-image
    Inserted(BookmarkRecord),
    /// A row was modified; carries the post-image
    Updated(BookmarkRecord),
    /// A row was removed; carries its id
    Deleted { id: BookmarkId },
}

impl ChangeEvent {
    /// Id of the affected row
    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => &record.id,
            ChangeEvent::Deleted { id } => id,
        }
    }

    /// Post-image carried by the event, if any
    pub fn record(&self) -> Option<&BookmarkRecord> {
        match self {
            ChangeEvent::Inserted(record) | ChangeEvent::Updated(record) => Some(record),
            ChangeEvent::Deleted { .. } => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::Inserted(_) => "insert",
            ChangeEvent::Updated(_) => "update",
            ChangeEvent::Deleted { .. } => "delete",
        }
    }
}
