#![forbid(unsafe_code)]

//! JSON file storage backend.
//!
//! The whole store is one JSON object (`{"key": "<payload>", ...}`) loaded
//! at open and rewritten after every mutation. Writes go to a sibling
//! `.tmp` file first and are renamed into place, so a crash mid-write never
//! leaves a truncated store behind.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::Result;
use crate::storage::StorageMethods;

#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RefCell<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the store at `path`, creating an empty one when the file does
    /// not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            let text = fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), entries = entries.len(), "file_storage.open");
        Ok(Self {
            path,
            entries: RefCell::new(entries),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_through(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(&*self.entries.borrow())?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl StorageMethods for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.to_owned());
        self.write_through()
    }

    fn remove(&self, key: &str) -> Result<()> {
        let removed = self.entries.borrow_mut().remove(key).is_some();
        if removed {
            self.write_through()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = FileStorage::open(&path).unwrap();
            store.set("_todos_item_1", r#"{"id":1}"#).unwrap();
            store.set("todos", "true").unwrap();
        }

        let store = FileStorage::open(&path).unwrap();
        assert_eq!(
            store.get("_todos_item_1").unwrap().as_deref(),
            Some(r#"{"id":1}"#)
        );
        assert_eq!(store.get("todos").unwrap().as_deref(), Some("true"));
    }

    #[test]
    fn remove_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let store = FileStorage::open(&path).unwrap();
        store.set("a", "1").unwrap();
        store.remove("a").unwrap();

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.get("a").unwrap(), None);
    }

    #[test]
    fn empty_file_opens_as_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, "").unwrap();
        let store = FileStorage::open(&path).unwrap();
        assert_eq!(store.get("anything").unwrap(), None);
    }
}
