//! Bookmark layer error types

use thiserror::Error;

use crate::provider::ProviderError;

/// Message shown when a required form field is blank
pub const REQUIRED_FIELDS_MESSAGE: &str = "Both title and URL are required.";

/// Fallback shown when an insert fails without a backend message
pub const ADD_FAILED_MESSAGE: &str = "Failed to add bookmark.";

/// Fallback shown when a delete fails without a backend message
pub const DELETE_FAILED_MESSAGE: &str = "Failed to delete";

/// Errors surfaced by the form and the bookmark list
#[derive(Error, Debug)]
pub enum BookmarkError {
    /// Input was rejected locally; nothing was sent
    #[error("{0}")]
    Validation(String),

    /// A submission is already in flight on this form
    #[error("A bookmark is already being saved")]
    Busy,

    /// The backend rejected or failed the request
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The list this request targeted has been torn down
    #[error("Bookmark list is closed")]
    Closed,
}

impl BookmarkError {
    /// Text to show the user for this failure
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            BookmarkError::Provider(err) => err.user_message_or(fallback),
            other => other.to_string(),
        }
    }
}

/// Result type alias for bookmark operations
pub type BookmarkResult<T> = Result<T, BookmarkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BookmarkError::Validation(REQUIRED_FIELDS_MESSAGE.to_string());
        assert_eq!(err.to_string(), "Both title and URL are required.");

        let err: BookmarkError = ProviderError::api(403, "permission denied").into();
        assert_eq!(err.to_string(), "permission denied");
        assert_eq!(err.user_message(DELETE_FAILED_MESSAGE), "permission denied");
    }

    #[test]
    fn test_provider_fallback_message() {
        let err: BookmarkError = ProviderError::api(500, "").into();
        assert_eq!(err.user_message(DELETE_FAILED_MESSAGE), "Failed to delete");
    }
}
