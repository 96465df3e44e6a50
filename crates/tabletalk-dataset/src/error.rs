//! Error types for dataset loading and the session registry.

use tabletalk_core::SessionId;

/// Errors from loading datasets and looking up session snapshots.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("dataset source unreadable: {0}")]
    Unreadable(String),
    #[error("dataset source is not valid tabular data: {0}")]
    Unparsable(String),
    #[error("dataset exceeds limit: {0}")]
    TooLarge(String),
    #[error("no dataset loaded for session {0}")]
    NotFound(SessionId),
    #[error("session {0} is closed")]
    SessionClosed(SessionId),
}

impl DatasetError {
    /// Whether this error came from reading or parsing a source.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            DatasetError::Unreadable(_) | DatasetError::Unparsable(_) | DatasetError::TooLarge(_)
        )
    }
}
