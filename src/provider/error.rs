//! Provider error types
//!
//! Every failure coming back from the hosted backend is mapped to a
//! [`ProviderError`] at the call boundary.

use thiserror::Error;

/// Errors that can occur when talking to the hosted backend
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with a non-success status
    #[error("{message}")]
    Api { status: u16, message: String },

    /// Missing or rejected credentials
    #[error("{0}")]
    Auth(String),

    /// Realtime channel failure (connect, join, protocol)
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// A response body could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// The backend refused the operation without a transport problem
    #[error("{0}")]
    Rejected(String),
}

impl ProviderError {
    /// Create an API error from status and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create an auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Create a realtime error
    pub fn realtime(message: impl Into<String>) -> Self {
        Self::Realtime(message.into())
    }

    /// Create a rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// The text shown to the user, or `None` when the backend gave no message.
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            ProviderError::Api { message, .. } => message.clone(),
            ProviderError::Auth(message) | ProviderError::Rejected(message) => message.clone(),
            other => other.to_string(),
        };

        if message.trim().is_empty() {
            None
        } else {
            Some(message)
        }
    }

    /// Like [`user_message`](Self::user_message), falling back to `fallback`.
    pub fn user_message_or(&self, fallback: &str) -> String {
        self.user_message().unwrap_or_else(|| fallback.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::Decode(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ProviderError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ProviderError::Realtime(err.to_string())
    }
}

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_is_verbatim() {
        let err = ProviderError::api(409, "duplicate key value violates unique constraint");
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint"
        );
        assert_eq!(
            err.user_message().as_deref(),
            Some("duplicate key value violates unique constraint")
        );
    }

    #[test]
    fn test_empty_message_uses_fallback() {
        let err = ProviderError::api(500, "");
        assert_eq!(err.user_message(), None);
        assert_eq!(err.user_message_or("Failed to delete"), "Failed to delete");

        let err = ProviderError::rejected("   ");
        assert_eq!(
            err.user_message_or("Failed to add bookmark."),
            "Failed to add bookmark."
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: ProviderError = json_err.into();
        assert!(matches!(err, ProviderError::Decode(_)));
        assert!(err.to_string().starts_with("Decode error:"));
    }
}
