#![forbid(unsafe_code)]

//! Mirroring a state into the hub's storages.
//!
//! # Design
//!
//! Persisting is deferred until the hub has a storage: the initial load is
//! queued with [`Storages::when_ready`](ripple_storage::Storages::when_ready).
//! On load a stored value wins and is applied with `overwrite` and without
//! writing back; with nothing stored the current value is written. Either
//! way a `persist` side effect then keeps storage in step with every commit
//! whose job allows storage writes.
//!
//! # Failure Modes
//!
//! - **No key**: neither the config nor the state has a key, so
//!   [`State::persist`] fails with `MissingKey`.
//! - **Superseded before storage**: a queued load whose persistent was
//!   dropped by `unpersist` or replaced by a later `persist` does nothing.
//! - **Backend errors** inside the side effect cannot propagate to the
//!   mutation that caused them; they are logged as `persistent.write_failed`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, warn};

use ripple_core::{Hub, IngestConfig, Result, RippleError, WeakHub};

use crate::state::{State, StateValue};

pub const PERSIST_SIDE_EFFECT: &str = "persist";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Storage key. Defaults to the state key.
    pub key: Option<String>,
    /// Storages to write to. Empty means the default storage.
    pub storage_keys: Vec<String>,
    /// Apply a stored value on the initial load.
    pub load: bool,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            key: None,
            storage_keys: Vec::new(),
            load: true,
        }
    }
}

impl PersistConfig {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_storage_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.storage_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_load(mut self, load: bool) -> Self {
        self.load = load;
        self
    }
}

pub struct StatePersistent {
    key: RefCell<String>,
    storage_keys: Vec<String>,
    ready: Cell<bool>,
    hub: WeakHub,
}

impl fmt::Debug for StatePersistent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatePersistent")
            .field("key", &self.key.borrow())
            .field("storage_keys", &self.storage_keys)
            .field("ready", &self.ready.get())
            .finish()
    }
}

impl StatePersistent {
    pub(crate) fn new(hub: &Hub, key: String, storage_keys: Vec<String>) -> Self {
        Self {
            key: RefCell::new(key),
            storage_keys,
            ready: Cell::new(false),
            hub: hub.downgrade(),
        }
    }

    #[must_use]
    pub fn key(&self) -> String {
        self.key.borrow().clone()
    }

    #[must_use]
    pub fn storage_keys(&self) -> &[String] {
        &self.storage_keys
    }

    /// Whether the initial load has run.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    fn hub(&self) -> Result<Hub> {
        self.hub.upgrade().ok_or(RippleError::dropped("hub"))
    }

    /// Read the stored value from the first configured storage.
    pub fn read(&self) -> Result<Option<Value>> {
        let hub = self.hub()?;
        let storage_key = self.storage_keys.first().map(String::as_str);
        Ok(hub.storages().get(&self.key.borrow(), storage_key)?)
    }

    pub fn write(&self, value: &Value) -> Result<()> {
        let hub = self.hub()?;
        hub.storages()
            .set(&self.key.borrow(), value, &self.storage_keys)?;
        debug!(key = %self.key.borrow(), "persistent.stored");
        Ok(())
    }

    pub fn remove_value(&self) -> Result<()> {
        let hub = self.hub()?;
        hub.storages().remove(&self.key.borrow(), &self.storage_keys)?;
        debug!(key = %self.key.borrow(), "persistent.removed");
        Ok(())
    }

    /// Move the stored entry to `key`, writing `value` under the new key.
    pub fn rekey(&self, key: &str, value: &Value) -> Result<()> {
        if self.ready.get() {
            self.remove_value()?;
        }
        *self.key.borrow_mut() = key.to_owned();
        if self.ready.get() {
            self.write(value)?;
        }
        Ok(())
    }
}

impl<T: StateValue> State<T> {
    /// Mirror this state into storage under `config.key` or the state key.
    pub fn persist(&self, config: PersistConfig) -> Result<Rc<StatePersistent>> {
        let key = match config.key.clone().or_else(|| self.key().map(|k| k.to_string())) {
            Some(key) if !key.is_empty() => key,
            _ => {
                warn!("persistent.missing_key");
                return Err(RippleError::missing_key("persistent"));
            }
        };
        let hub = self.hub()?;
        let persistent = Rc::new(StatePersistent::new(&hub, key, config.storage_keys));
        *self.state_observer().persistent.borrow_mut() = Some(Rc::clone(&persistent));

        let weak = self.downgrade();
        let pending = Rc::clone(&persistent);
        let load = config.load;
        hub.storages().when_ready(move || {
            let Some(observer) = weak.upgrade() else {
                return;
            };
            let state = State::from_observer(observer);
            if !state.persistent().is_some_and(|p| Rc::ptr_eq(&p, &pending)) {
                debug!(key = %pending.key(), "persistent.superseded");
                return;
            }
            if let Err(err) = initial_load(&state, &pending, load) {
                warn!(key = %pending.key(), error = %err, "persistent.load_failed");
            }
        });
        Ok(persistent)
    }

    #[must_use]
    pub fn persistent(&self) -> Option<Rc<StatePersistent>> {
        self.state_observer().persistent.borrow().clone()
    }

    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.persistent().is_some_and(|p| p.is_ready())
    }

    /// Stop mirroring. With `remove_value` the stored entry is deleted too.
    pub fn unpersist(&self, remove_value: bool) -> Result<()> {
        let Some(persistent) = self.state_observer().persistent.borrow_mut().take() else {
            return Ok(());
        };
        self.remove_side_effect(PERSIST_SIDE_EFFECT);
        if remove_value && persistent.is_ready() {
            persistent.remove_value()?;
        }
        Ok(())
    }
}

fn initial_load<T: StateValue>(
    state: &State<T>,
    persistent: &Rc<StatePersistent>,
    load: bool,
) -> Result<()> {
    let stored = if load { persistent.read()? } else { None };
    match stored {
        Some(value) => {
            let value: T = serde_json::from_value(value)?;
            state.set_with(
                value,
                IngestConfig::default()
                    .with_storage(false)
                    .with_overwrite(true),
            )?;
            debug!(key = %persistent.key(), "persistent.loaded");
        }
        None => persistent.write(&serde_json::to_value(state.peek())?)?,
    }

    let sink = Rc::clone(persistent);
    state.add_side_effect(PERSIST_SIDE_EFFECT, 0, move |change| {
        if !change.config.storage {
            return;
        }
        let written = serde_json::to_value(change.value)
            .map_err(RippleError::from)
            .and_then(|value| sink.write(&value));
        if let Err(err) = written {
            warn!(key = %sink.key(), error = %err, "persistent.write_failed");
        }
    });
    persistent.ready.set(true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ripple_core::HubConfig;
    use ripple_storage::{MemoryStorage, RegisterConfig, Storage};

    fn hub_with_memory() -> (Hub, MemoryStorage) {
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let memory = MemoryStorage::new();
        hub.register_storage(
            Storage::new("memory", memory.clone()).unwrap(),
            RegisterConfig::default(),
        )
        .unwrap();
        (hub, memory)
    }

    #[test]
    fn persist_writes_current_value_then_every_commit() {
        let (hub, memory) = hub_with_memory();
        let state = State::new(&hub, 1);
        state.persist(PersistConfig::default().with_key("counter")).unwrap();
        assert_eq!(memory.raw("counter").as_deref(), Some("1"));
        assert!(state.is_persisted());

        state.set(2).unwrap();
        assert_eq!(memory.raw("counter").as_deref(), Some("2"));

        state
            .set_with(3, IngestConfig::default().with_storage(false))
            .unwrap();
        assert_eq!(memory.raw("counter").as_deref(), Some("2"));
    }

    #[test]
    fn stored_value_wins_on_load() {
        let (hub, memory) = hub_with_memory();
        hub.storages().set("name", &Value::from("stored"), &[]).unwrap();
        let state = State::new(&hub, "fresh".to_owned());
        state.persist(PersistConfig::default().with_key("name")).unwrap();

        assert_eq!(state.peek(), "stored");
        assert_eq!(state.initial_value(), "stored");
        assert_eq!(memory.raw("name").as_deref(), Some("\"stored\""));
    }

    #[test]
    fn load_waits_for_first_storage() {
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let state = State::with_config(
            &hub,
            5,
            crate::StateConfig::default().with_key("late"),
        );
        let persistent = state.persist(PersistConfig::default()).unwrap();
        assert!(!persistent.is_ready());
        assert_eq!(hub.storages().pending_count(), 1);

        let memory = MemoryStorage::new();
        hub.register_storage(
            Storage::new("memory", memory.clone()).unwrap(),
            RegisterConfig::default(),
        )
        .unwrap();
        assert!(persistent.is_ready());
        assert_eq!(memory.raw("late").as_deref(), Some("5"));
    }

    #[test]
    fn unpersist_before_storage_cancels_the_load() {
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let state = State::with_config(
            &hub,
            "dark".to_owned(),
            crate::StateConfig::default().with_key("theme"),
        );
        let persistent = state.persist(PersistConfig::default()).unwrap();
        state.unpersist(false).unwrap();

        let memory = MemoryStorage::new();
        hub.register_storage(
            Storage::new("memory", memory.clone()).unwrap(),
            RegisterConfig::default(),
        )
        .unwrap();
        state.set("light".to_owned()).unwrap();

        assert!(memory.is_empty());
        assert!(!persistent.is_ready());
        assert!(!state.has_side_effect(PERSIST_SIDE_EFFECT));
        assert!(state.persistent().is_none());
    }

    #[test]
    fn repersist_before_storage_loads_once_under_latest_key() {
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let state = State::new(&hub, 4);
        let first = state.persist(PersistConfig::default().with_key("a")).unwrap();
        let second = state.persist(PersistConfig::default().with_key("b")).unwrap();

        let memory = MemoryStorage::new();
        hub.register_storage(
            Storage::new("memory", memory.clone()).unwrap(),
            RegisterConfig::default(),
        )
        .unwrap();
        state.set(5).unwrap();

        assert!(!first.is_ready());
        assert!(second.is_ready());
        assert_eq!(memory.raw("a"), None);
        assert_eq!(memory.raw("b").as_deref(), Some("5"));
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn missing_key_is_rejected() {
        let (hub, _) = hub_with_memory();
        let state = State::new(&hub, 0);
        assert!(matches!(
            state.persist(PersistConfig::default()),
            Err(RippleError::MissingKey { kind: "persistent" })
        ));
    }

    #[test]
    fn rekey_moves_entry() {
        let (hub, memory) = hub_with_memory();
        let state = State::with_config(&hub, 9, crate::StateConfig::default().with_key("old"));
        state.persist(PersistConfig::default()).unwrap();
        state.set_key("new").unwrap();
        assert!(!memory.contains("old"));
        assert_eq!(memory.raw("new").as_deref(), Some("9"));
    }

    #[test]
    fn unpersist_removes_entry() {
        let (hub, memory) = hub_with_memory();
        let state = State::new(&hub, 4);
        state.persist(PersistConfig::default().with_key("gone")).unwrap();
        state.unpersist(true).unwrap();
        assert!(!memory.contains("gone"));
        state.set(5).unwrap();
        assert!(!memory.contains("gone"));
        assert!(!state.is_persisted());
    }
}
