#![forbid(unsafe_code)]

//! Per-hub registry of named storages.
//!
//! # Invariants
//!
//! 1. Storage keys are unique within a registry.
//! 2. Once any storage is registered there is always a default storage.
//! 3. Work queued through [`Storages::when_ready`] runs exactly once, in
//!    queue order, right after the first storage registers.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, StorageError};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterConfig {
    /// Make this storage the default even if another one is registered.
    pub default: bool,
}

impl RegisterConfig {
    #[must_use]
    pub fn as_default() -> Self {
        Self { default: true }
    }
}

type ReadyTask = Box<dyn FnOnce()>;

#[derive(Default)]
pub struct Storages {
    storages: RefCell<IndexMap<String, Rc<Storage>>>,
    default_key: RefCell<Option<String>>,
    pending: RefCell<Vec<ReadyTask>>,
}

impl fmt::Debug for Storages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storages")
            .field("storages", &self.storages.borrow().keys().collect::<Vec<_>>())
            .field("default_key", &self.default_key.borrow())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl Storages {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `storage`.
    ///
    /// The first registered storage becomes the default unless a later
    /// registration asks for it explicitly. Registering the first storage
    /// runs every task queued with [`when_ready`](Self::when_ready).
    pub fn register(&self, storage: Storage, config: RegisterConfig) -> Result<()> {
        let key = storage.key().to_owned();
        let was_empty = {
            let mut storages = self.storages.borrow_mut();
            if storages.contains_key(&key) {
                return Err(StorageError::DuplicateStorage { key });
            }
            let was_empty = storages.is_empty();
            storages.insert(key.clone(), Rc::new(storage));
            was_empty
        };
        if config.default || self.default_key.borrow().is_none() {
            *self.default_key.borrow_mut() = Some(key.clone());
        }
        info!(storage = %key, default = config.default, "storages.registered");

        if was_empty {
            let tasks = std::mem::take(&mut *self.pending.borrow_mut());
            debug!(tasks = tasks.len(), "storages.ready");
            for task in tasks {
                task();
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn has_storage(&self) -> bool {
        !self.storages.borrow().is_empty()
    }

    #[must_use]
    pub fn get_storage(&self, key: &str) -> Option<Rc<Storage>> {
        self.storages.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn default_storage_key(&self) -> Option<String> {
        self.default_key.borrow().clone()
    }

    /// Run `task` now if a storage exists, otherwise once the first one
    /// registers.
    pub fn when_ready(&self, task: impl FnOnce() + 'static) {
        if self.has_storage() {
            task();
        } else {
            self.pending.borrow_mut().push(Box::new(task));
        }
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Read `key` from `storage_key`, or from the default storage.
    pub fn get(&self, key: &str, storage_key: Option<&str>) -> Result<Option<Value>> {
        let storage = self.resolve(storage_key)?;
        storage.get(key)
    }

    /// Write `key` into every storage in `storage_keys`, or into the default
    /// storage when the list is empty.
    pub fn set(&self, key: &str, value: &Value, storage_keys: &[String]) -> Result<()> {
        for storage in self.resolve_all(storage_keys)? {
            storage.set(key, value)?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &str, storage_keys: &[String]) -> Result<()> {
        for storage in self.resolve_all(storage_keys)? {
            storage.remove(key)?;
        }
        Ok(())
    }

    fn resolve(&self, storage_key: Option<&str>) -> Result<Rc<Storage>> {
        let key = match storage_key {
            Some(key) => key.to_owned(),
            None => self.default_storage_key().ok_or(StorageError::NoStorage)?,
        };
        self.get_storage(&key)
            .ok_or(StorageError::StorageNotFound { key })
    }

    fn resolve_all(&self, storage_keys: &[String]) -> Result<Vec<Rc<Storage>>> {
        if storage_keys.is_empty() {
            return Ok(vec![self.resolve(None)?]);
        }
        storage_keys
            .iter()
            .map(|key| self.resolve(Some(key)))
            .collect()
    }
}
