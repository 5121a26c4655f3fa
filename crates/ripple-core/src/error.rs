#![forbid(unsafe_code)]

use ripple_storage::StorageError;
use thiserror::Error;

use crate::key::Key;

pub type Result<T> = std::result::Result<T, RippleError>;

/// Every expected failure mode of the library.
///
/// None of these are panics: operations log the failure at the call site and
/// hand it back to the caller, leaving the object graph untouched.
#[derive(Debug, Error)]
pub enum RippleError {
    #[error("{kind} has no valid key")]
    MissingKey { kind: &'static str },

    #[error("{kind} with key '{key}' already exists")]
    DuplicateKey { kind: &'static str, key: String },

    #[error("item '{item}' not found in collection '{collection}'")]
    ItemNotFound { collection: String, item: Key },

    #[error("group '{group}' not found in collection '{collection}'")]
    GroupNotFound { collection: String, group: Key },

    #[error("selector '{selector}' not found in collection '{collection}'")]
    SelectorNotFound { collection: String, selector: Key },

    #[error("item has no usable primary key '{primary_key}'")]
    MissingPrimaryKey { primary_key: String },

    #[error("changes must be a JSON object, got {found}")]
    InvalidChanges { found: &'static str },

    #[error("observer '{observer}' does not implement perform")]
    AbstractPerform { observer: String },

    #[error("dependency cycle: {}", format_path(.path))]
    DependencyCycle { path: Vec<String> },

    #[error("job for observer '{observer}' carries no payload")]
    MissingPayload { observer: String },

    #[error("{what} was dropped")]
    Dropped { what: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_path(path: &[String]) -> String {
    path.join(" -> ")
}

impl RippleError {
    #[must_use]
    pub fn missing_key(kind: &'static str) -> Self {
        Self::MissingKey { kind }
    }

    #[must_use]
    pub fn duplicate_key(kind: &'static str, key: impl ToString) -> Self {
        Self::DuplicateKey {
            kind,
            key: key.to_string(),
        }
    }

    #[must_use]
    pub fn dropped(what: &'static str) -> Self {
        Self::Dropped { what }
    }

    /// Whether the error is a not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ItemNotFound { .. } | Self::GroupNotFound { .. } | Self::SelectorNotFound { .. }
        )
    }
}
