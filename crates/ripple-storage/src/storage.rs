#![forbid(unsafe_code)]

//! A single storage: a backend plus key prefixing and JSON encoding.
//!
//! # Design
//!
//! Backends only move strings ([`StorageMethods`]). [`Storage`] owns the
//! JSON layer, so every backend stores the exact same serialized payloads
//! and external inspection tools can read them back without knowing which
//! backend wrote them.
//!
//! # Failure Modes
//!
//! - **Foreign payload**: a stored string that is not valid JSON is handed
//!   back as a JSON string instead of failing the load.
//! - **Backend error**: propagated unchanged as [`StorageError`].

use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StorageError};

/// The raw key-value contract a persistence backend must fulfil.
///
/// Methods take `&self`; backends use interior mutability. All calls happen
/// on the hub's thread.
pub trait StorageMethods {
    /// Read the payload stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store `value` under `key`, replacing any previous payload.
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Per-storage options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    /// When set, every key is stored as `_<prefix>_<key>`.
    pub prefix: Option<String>,
}

impl StorageConfig {
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// A named storage backed by a [`StorageMethods`] implementation.
#[derive(Clone)]
pub struct Storage {
    key: String,
    config: StorageConfig,
    methods: Rc<dyn StorageMethods>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("key", &self.key)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Create a storage with default options.
    pub fn new(key: impl Into<String>, methods: impl StorageMethods + 'static) -> Result<Self> {
        Self::with_config(key, methods, StorageConfig::default())
    }

    /// Create a storage with explicit options.
    ///
    /// Fails with [`StorageError::MissingKey`] when `key` is empty.
    pub fn with_config(
        key: impl Into<String>,
        methods: impl StorageMethods + 'static,
        config: StorageConfig,
    ) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(StorageError::MissingKey);
        }
        Ok(Self {
            key,
            config,
            methods: Rc::new(methods),
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The backend key a logical key is stored under.
    #[must_use]
    pub fn storage_key(&self, key: &str) -> String {
        match &self.config.prefix {
            Some(prefix) => format!("_{prefix}_{key}"),
            None => key.to_owned(),
        }
    }

    /// Load and decode the value stored under `key`.
    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(raw) = self.methods.get(&self.storage_key(key))? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                debug!(storage = %self.key, key, %err, "storage.non_json_payload");
                Ok(Some(Value::String(raw)))
            }
        }
    }

    /// Encode and store `value` under `key`.
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.methods.set(&self.storage_key(key), &raw)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.methods.remove(&self.storage_key(key))
    }
}
