#![forbid(unsafe_code)]

//! Weighted side-effect list.
//!
//! Entries stay sorted on insert: descending weight, ties in registration
//! order. Running them never needs a sort.

use std::fmt;

use crate::job::SideEffectConfig;

pub struct SideEffect<F> {
    pub key: String,
    pub weight: i32,
    pub callback: F,
}

pub struct SideEffectList<F> {
    entries: Vec<SideEffect<F>>,
}

impl<F> Default for SideEffectList<F> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<F> fmt::Debug for SideEffectList<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| (&e.key, e.weight)))
            .finish()
    }
}

impl<F> SideEffectList<F> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `callback` under `key`, replacing an existing entry with the
    /// same key.
    pub fn insert(&mut self, key: impl Into<String>, weight: i32, callback: F) {
        let key = key.into();
        self.remove(&key);
        let at = self
            .entries
            .iter()
            .position(|e| e.weight < weight)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            at,
            SideEffect {
                key,
                weight,
                callback,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.key != key);
        self.entries.len() != before
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|e| e.key == key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.key.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SideEffect<F>> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<F: Clone> SideEffectList<F> {
    /// Callbacks that `config` lets run, in execution order.
    ///
    /// Cloned out so the caller can release its borrow before running them.
    #[must_use]
    pub fn runnable(&self, config: &SideEffectConfig) -> Vec<(String, F)> {
        if !config.enabled {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|e| config.allows(&e.key))
            .map(|e| (e.key.clone(), e.callback.clone()))
            .collect()
    }
}
