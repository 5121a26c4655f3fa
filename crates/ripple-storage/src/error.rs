use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage key must not be empty")]
    MissingKey,

    #[error("storage already registered: {key}")]
    DuplicateStorage { key: String },

    #[error("storage not found: {key}")]
    StorageNotFound { key: String },

    #[error("no storage registered")]
    NoStorage,

    #[error("backend failure: {message}")]
    Backend { message: String },
}

impl StorageError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
