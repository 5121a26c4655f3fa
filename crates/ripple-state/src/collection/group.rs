#![forbid(unsafe_code)]

//! Ordered views over a collection's items.
//!
//! # Design
//!
//! A [`Group<T>`] is two observers. The key list is a plain
//! `State<Vec<Key>>` (the value observer). The resolved item list lives in
//! a [`GroupObserver`], which is a dependent of the key list and of every
//! item it resolved, so key edits and item edits both reach it through the
//! runtime's propagation. Subscribing to a group subscribes to the output.
//!
//! # Invariants
//!
//! 1. `output` holds the value of every listed key that resolves to an
//!    item, in key order; the rest are in `not_found_item_keys`.
//! 2. The group observer depends on exactly the item observers it resolved
//!    in its last rebuild.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::{debug, trace};

use ripple_core::{
    Hub, IngestConfig, Key, Observable, Observer, ObserverCore, ObserverId, Result, RippleError,
    RuntimeJob, ingest_job,
};

use super::CollectionInner;
use crate::state::{State, StateConfig, StateValue};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddMethod {
    #[default]
    Push,
    Unshift,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupAddConfig {
    pub method: AddMethod,
    /// Move keys that are already present to the insertion point.
    pub overwrite: bool,
    pub background: bool,
}

impl GroupAddConfig {
    #[must_use]
    pub fn with_method(mut self, method: AddMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

type Rebuilt<T> = (Vec<T>, Vec<Key>);

pub struct GroupObserver<T: StateValue> {
    core: ObserverCore,
    output: RefCell<Vec<T>>,
    not_found: RefCell<Vec<Key>>,
    keys: State<Vec<Key>>,
    collection: Weak<CollectionInner<T>>,
    item_deps: RefCell<IndexMap<ObserverId, Weak<dyn Observer>>>,
    this: Weak<GroupObserver<T>>,
}

impl<T: StateValue> GroupObserver<T> {
    /// Resolve the current key list and move the dependency edges onto the
    /// items found.
    fn resolve(&self) -> Rebuilt<T> {
        let keys = self.keys.peek();
        let mut output = Vec::with_capacity(keys.len());
        let mut not_found = Vec::new();
        let mut found: IndexMap<ObserverId, Rc<dyn Observer>> = IndexMap::new();

        let items = self
            .collection
            .upgrade()
            .map(|collection| collection.items_snapshot(&keys))
            .unwrap_or_default();
        for (key, item) in keys.into_iter().zip(items) {
            match item {
                Some(item) => {
                    output.push(item.peek());
                    let observer = item.observer();
                    found.insert(observer.core().id(), observer);
                }
                None => not_found.push(key),
            }
        }
        self.rewire(found);
        (output, not_found)
    }

    fn rewire(&self, found: IndexMap<ObserverId, Rc<dyn Observer>>) {
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let this: Rc<dyn Observer> = this;
        let own_id = self.core.id();
        for (id, old) in self.item_deps.borrow().iter() {
            if !found.contains_key(id)
                && let Some(old) = old.upgrade()
            {
                old.core().remove_dependent(own_id);
            }
        }
        for item in found.values() {
            item.core().add_dependent(&this);
        }
        *self.item_deps.borrow_mut() = found
            .iter()
            .map(|(id, item)| (*id, Rc::downgrade(item)))
            .collect();
    }
}

impl<T: StateValue> Observer for GroupObserver<T> {
    fn core(&self) -> &ObserverCore {
        &self.core
    }

    fn ingest(self: Rc<Self>, config: IngestConfig) -> Result<()> {
        let rebuilt = self.resolve();
        let unchanged = *self.output.borrow() == rebuilt.0 && *self.not_found.borrow() == rebuilt.1;
        if unchanged && !config.force {
            trace!(group = %self.core.label(), "group.unchanged");
            return Ok(());
        }
        ingest_job(self, Some(Box::new(rebuilt)), config)
    }

    fn perform(&self, job: &RuntimeJob) -> Result<()> {
        let (output, not_found) =
            job.take_payload::<Rebuilt<T>>()
                .ok_or_else(|| RippleError::MissingPayload {
                    observer: self.core.label(),
                })?;
        let value = serde_json::to_value(&output)?;
        let previous = serde_json::to_value(&*self.output.borrow())?;
        if !not_found.is_empty() {
            debug!(group = %self.core.label(), keys = ?not_found, "group.items_not_found");
        }
        *self.output.borrow_mut() = output;
        *self.not_found.borrow_mut() = not_found;
        self.core.commit_values(value, previous);
        Ok(())
    }
}

/// An ordered list of item keys and the items they resolve to.
pub struct Group<T: StateValue> {
    keys: State<Vec<Key>>,
    observer: Rc<GroupObserver<T>>,
}

impl<T: StateValue> Clone for Group<T> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            observer: Rc::clone(&self.observer),
        }
    }
}

impl<T: StateValue> std::fmt::Debug for Group<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("key", &self.key())
            .field("keys", &self.keys.peek())
            .field("not_found", &self.observer.not_found.borrow())
            .finish()
    }
}

impl<T: StateValue> Observable for Group<T> {
    fn observer(&self) -> Rc<dyn Observer> {
        Rc::clone(&self.observer) as Rc<dyn Observer>
    }
}

impl<T: StateValue> Group<T> {
    pub(crate) fn new(
        hub: &Hub,
        collection: Weak<CollectionInner<T>>,
        key: Key,
        initial: Vec<Key>,
    ) -> Self {
        let keys = State::with_config(hub, dedup(initial), StateConfig::default().with_key(key.clone()));
        let observer = Rc::new_cyclic(|this| GroupObserver {
            core: ObserverCore::new(hub, Some(key)),
            output: RefCell::new(Vec::new()),
            not_found: RefCell::new(Vec::new()),
            keys: keys.clone(),
            collection,
            item_deps: RefCell::new(IndexMap::new()),
            this: this.clone(),
        });
        let (output, not_found) = observer.resolve();
        if let Ok(value) = serde_json::to_value(&output) {
            observer.core.seed_value(value);
        }
        *observer.output.borrow_mut() = output;
        *observer.not_found.borrow_mut() = not_found;

        let dependent: Rc<dyn Observer> = Rc::clone(&observer) as Rc<dyn Observer>;
        keys.observer().core().add_dependent(&dependent);
        Self { keys, observer }
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.observer.core.key()
    }

    /// Add `keys` at the end (or the front, with [`AddMethod::Unshift`]).
    pub fn add<I>(&self, keys: I, config: GroupAddConfig) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        let mut current = self.keys.next_value();
        let mut added: Vec<Key> = Vec::new();
        for key in keys {
            let key = key.into();
            if added.contains(&key) {
                continue;
            }
            if let Some(index) = current.iter().position(|k| *k == key) {
                if !config.overwrite {
                    continue;
                }
                current.remove(index);
            }
            added.push(key);
        }
        if added.is_empty() {
            return Ok(());
        }
        match config.method {
            AddMethod::Push => current.extend(added),
            AddMethod::Unshift => {
                added.extend(current);
                current = added;
            }
        }
        self.keys.set_with(
            current,
            IngestConfig::default().with_background(config.background),
        )
    }

    pub fn remove<I>(&self, keys: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        self.remove_with(keys, IngestConfig::default())
    }

    pub(crate) fn remove_with<I>(&self, keys: I, config: IngestConfig) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        let drop: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let mut current = self.keys.next_value();
        let before = current.len();
        current.retain(|key| !drop.contains(key));
        if current.len() == before {
            return Ok(());
        }
        self.keys.set_with(current, config)
    }

    /// Swap `old` for `new` in place. Returns `false` if `old` is absent.
    pub fn replace(&self, old: &Key, new: Key) -> Result<bool> {
        let current = self.keys.next_value();
        let Some(index) = current.iter().position(|k| k == old) else {
            return Ok(false);
        };
        let next: Vec<Key> = current
            .into_iter()
            .enumerate()
            .filter(|(i, k)| *i == index || *k != new)
            .map(|(i, k)| if i == index { new.clone() } else { k })
            .collect();
        self.keys.set(next)?;
        Ok(true)
    }

    /// Re-resolve the output against the collection.
    pub fn rebuild(&self) -> Result<()> {
        Rc::clone(&self.observer).ingest(IngestConfig::default())
    }

    #[must_use]
    pub fn has(&self, key: &Key) -> bool {
        self.keys.peek().contains(key)
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.keys.peek().len()
    }

    /// The key list. Tracked.
    #[must_use]
    pub fn keys(&self) -> Vec<Key> {
        self.keys.value()
    }

    /// The resolved items. Tracked.
    #[must_use]
    pub fn output(&self) -> Vec<T> {
        if let Ok(hub) = self.observer.core.hub()
            && hub.tracker().is_tracking()
        {
            hub.tracker().tracked(&self.observer());
        }
        self.observer.output.borrow().clone()
    }

    #[must_use]
    pub fn not_found_item_keys(&self) -> Vec<Key> {
        self.observer.not_found.borrow().clone()
    }

    /// The observer of the key list.
    #[must_use]
    pub fn value_observer(&self) -> Rc<dyn Observer> {
        self.keys.observer()
    }

    /// The key list as a state, for persistence.
    #[must_use]
    pub fn keys_state(&self) -> &State<Vec<Key>> {
        &self.keys
    }

    #[must_use]
    pub fn group_observer(&self) -> &Rc<GroupObserver<T>> {
        &self.observer
    }
}

fn dedup(keys: Vec<Key>) -> Vec<Key> {
    let mut out: Vec<Key> = Vec::with_capacity(keys.len());
    for key in keys {
        if !out.contains(&key) {
            out.push(key);
        }
    }
    out
}
