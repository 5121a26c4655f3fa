#![forbid(unsafe_code)]

//! Collection persistence.
//!
//! A persisted collection `c` occupies these storage entries:
//!
//! | Entry                | Value                                   |
//! |----------------------|-----------------------------------------|
//! | `c`                  | `true`                                  |
//! | `_c_group_<default>` | JSON array of the default group's keys  |
//! | `_c_item_<key>`      | the item, for every key in that group   |
//!
//! Only the default group is stored, since it lists every item. A side
//! effect on its key list adds and removes item entries as keys come and
//! go.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use ripple_core::{Hub, Key, Result, RippleError, WeakHub};

use super::{CollectConfig, Collection, CollectionInner};
use crate::persistent::PersistConfig;
use crate::state::{Change, StateValue};

const ITEMS_SIDE_EFFECT: &str = "persist_items";

/// Storage key of item `item_key` in collection `collection_key`.
#[must_use]
pub fn item_storage_key(collection_key: &str, item_key: &Key) -> String {
    format!("_{collection_key}_item_{item_key}")
}

/// Storage key of group `group_key` in collection `collection_key`.
#[must_use]
pub fn group_storage_key(collection_key: &str, group_key: &Key) -> String {
    format!("_{collection_key}_group_{group_key}")
}

pub struct CollectionPersistent {
    key: RefCell<String>,
    storage_keys: Vec<String>,
    ready: Cell<bool>,
    hub: WeakHub,
}

impl fmt::Debug for CollectionPersistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionPersistent")
            .field("key", &self.key.borrow())
            .field("storage_keys", &self.storage_keys)
            .field("ready", &self.ready.get())
            .finish()
    }
}

impl CollectionPersistent {
    #[must_use]
    pub fn key(&self) -> String {
        self.key.borrow().clone()
    }

    #[must_use]
    pub fn storage_keys(&self) -> &[String] {
        &self.storage_keys
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn hub(&self) -> Result<Hub> {
        self.hub.upgrade().ok_or(RippleError::dropped("hub"))
    }

    fn read(&self, key: &str) -> Result<Option<Value>> {
        let storage_key = self.storage_keys.first().map(String::as_str);
        Ok(self.hub()?.storages().get(key, storage_key)?)
    }

    fn write_flag(&self) -> Result<()> {
        let hub = self.hub()?;
        hub.storages()
            .set(&self.key.borrow(), &Value::Bool(true), &self.storage_keys)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.hub()?.storages().remove(key, &self.storage_keys)?;
        Ok(())
    }

    fn item_config(&self, item_key: &Key) -> PersistConfig {
        PersistConfig::default()
            .with_key(item_storage_key(&self.key.borrow(), item_key))
            .with_storage_keys(self.storage_keys.iter().cloned())
            .with_load(false)
    }
}

impl<T: StateValue> Collection<T> {
    /// Mirror the collection into storage under `config.key` or the
    /// collection key. A stored collection is loaded first.
    pub fn persist(&self, config: PersistConfig) -> Result<Rc<CollectionPersistent>> {
        let key = match config.key.clone().or_else(|| self.key().map(|k| k.to_string())) {
            Some(key) if !key.is_empty() => key,
            _ => {
                warn!("collection.persist_missing_key");
                return Err(RippleError::missing_key("persistent"));
            }
        };
        let hub = self.hub()?;
        let persistent = Rc::new(CollectionPersistent {
            key: RefCell::new(key),
            storage_keys: config.storage_keys,
            ready: Cell::new(false),
            hub: hub.downgrade(),
        });
        *self.inner.persistent.borrow_mut() = Some(Rc::clone(&persistent));

        let weak = self.downgrade();
        let pending = Rc::clone(&persistent);
        let load = config.load;
        hub.storages().when_ready(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let collection = Collection::from_inner(inner);
            if !collection.persistent().is_some_and(|p| Rc::ptr_eq(&p, &pending)) {
                debug!(key = %pending.key(), "collection.persist_superseded");
                return;
            }
            if let Err(err) = collection.initial_load(&pending, load) {
                warn!(key = %pending.key(), error = %err, "collection.load_failed");
            }
        });
        Ok(persistent)
    }

    #[must_use]
    pub fn persistent(&self) -> Option<Rc<CollectionPersistent>> {
        self.inner.persistent.borrow().clone()
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persistent().is_some_and(|p| p.is_ready())
    }

    /// Rename the collection. Stored entries keyed by the old name move.
    pub fn set_key(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        let old = self.inner.key.replace(Some(key.clone()));
        let Some(persistent) = self.persistent() else {
            return Ok(());
        };
        let derived = old.is_some_and(|old| persistent.key() == old.to_string());
        if !derived {
            return Ok(());
        }
        let new_key = key.to_string();
        if !persistent.is_ready() {
            *persistent.key.borrow_mut() = new_key;
            return Ok(());
        }

        persistent.remove(&persistent.key())?;
        *persistent.key.borrow_mut() = new_key.clone();
        persistent.write_flag()?;

        let group = self.get_default_group();
        if let Some(group_persistent) = group.keys_state().persistent() {
            group_persistent.rekey(
                &group_storage_key(&new_key, &self.inner.default_group_key),
                &serde_json::to_value(group.keys_state().peek())?,
            )?;
        }
        let items: Vec<(Key, _)> = self
            .inner
            .items
            .borrow()
            .iter()
            .map(|(k, item)| (k.clone(), item.clone()))
            .collect();
        for (item_key, item) in items {
            if let Some(item_persistent) = item.persistent() {
                item_persistent.rekey(
                    &item_storage_key(&new_key, &item_key),
                    &serde_json::to_value(item.peek())?,
                )?;
            }
        }
        debug!(collection = %new_key, "collection.rekeyed");
        Ok(())
    }

    fn initial_load(&self, persistent: &Rc<CollectionPersistent>, load: bool) -> Result<()> {
        let key = persistent.key();
        let default_key = self.inner.default_group_key.clone();
        let stored = if load { persistent.read(&key)? } else { None };

        if stored == Some(Value::Bool(true)) {
            let keys: Vec<Key> = persistent
                .read(&group_storage_key(&key, &default_key))?
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            let mut items = Vec::with_capacity(keys.len());
            for item_key in &keys {
                match persistent.read(&item_storage_key(&key, item_key))? {
                    Some(value) => items.push(serde_json::from_value::<T>(value)?),
                    None => warn!(collection = %key, item = %item_key, "collection.stored_item_missing"),
                }
            }
            debug!(collection = %key, items = items.len(), "collection.loaded");
            self.collect(items, CollectConfig::default())?;
        } else {
            persistent.write_flag()?;
        }

        let group = self.get_default_group();
        group.keys_state().persist(
            PersistConfig::default()
                .with_key(group_storage_key(&key, &default_key))
                .with_storage_keys(persistent.storage_keys.iter().cloned())
                .with_load(false),
        )?;
        for item_key in group.keys_state().peek() {
            self.persist_item(persistent, &item_key)?;
        }

        let weak = self.downgrade();
        let sink = Rc::clone(persistent);
        group
            .keys_state()
            .add_side_effect(ITEMS_SIDE_EFFECT, 0, move |change| {
                if !change.config.storage {
                    return;
                }
                if let Err(err) = sync_items(&weak, &sink, change) {
                    warn!(collection = %sink.key(), error = %err, "collection.write_failed");
                }
            });
        persistent.ready.set(true);
        Ok(())
    }

    fn persist_item(&self, persistent: &CollectionPersistent, item_key: &Key) -> Result<()> {
        let Some(item) = self.inner.item(item_key) else {
            return Ok(());
        };
        let config = persistent.item_config(item_key);
        let current = item.persistent();
        if current.is_some_and(|p| Some(p.key()) == config.key) {
            return Ok(());
        }
        item.persist(config)?;
        Ok(())
    }
}

/// Bring item entries in line with a change of the default group's keys.
fn sync_items<T: StateValue>(
    collection: &Weak<CollectionInner<T>>,
    persistent: &CollectionPersistent,
    change: &Change<'_, Vec<Key>>,
) -> Result<()> {
    let Some(inner) = collection.upgrade() else {
        return Ok(());
    };
    let collection = Collection::from_inner(inner);
    for removed in change.previous.iter().filter(|k| !change.value.contains(k)) {
        match collection.inner.item(removed) {
            Some(item) if item.persistent().is_some() => item.unpersist(true)?,
            _ => persistent.remove(&item_storage_key(&persistent.key(), removed))?,
        }
    }
    for added in change.value.iter().filter(|k| !change.previous.contains(k)) {
        collection.persist_item(persistent, added)?;
    }
    Ok(())
}
