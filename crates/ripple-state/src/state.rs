#![forbid(unsafe_code)]

//! Observable state values.
//!
//! # Design
//!
//! A [`State<T>`] is a handle to a [`StateObserver<T>`], which holds the
//! value history (current, previous, initial, next) next to the observer
//! bookkeeping. Mutations never write the value directly: `set` and friends
//! compute the next value and hand a job to the runtime, and the runtime
//! calls back into [`StateObserver`]'s `perform` to commit it.
//!
//! # Invariants
//!
//! 1. `is_set` is true iff the committed value differs from the initial
//!    value.
//! 2. A placeholder always ingests, with `force` and `overwrite`, and stops
//!    being a placeholder once that job commits.
//! 3. Watchers run on every commit; side effects run in descending weight
//!    order unless the job disables or excludes them.
//!
//! # Failure Modes
//!
//! - **Unserializable value**: `perform` fails before committing anything;
//!   the runtime records the fault.
//! - **Hub dropped**: mutations return [`RippleError::Dropped`].

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{trace, warn};

use ripple_core::{
    Hub, IngestConfig, JobConfig, Key, Observable, Observer, ObserverCore, Result, RippleError,
    RuntimeJob, SideEffectList, ingest_job,
};

use crate::json;
use crate::persistent::StatePersistent;

/// Bound shared by every value a primitive can hold.
pub trait StateValue: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> StateValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + 'static {}

/// A committed transition, as seen by side effects.
pub struct Change<'a, T> {
    pub value: &'a T,
    pub previous: &'a T,
    pub config: &'a JobConfig,
}

pub type WatcherFn<T> = Rc<dyn Fn(&T, &str)>;
pub type SideEffectFn<T> = Rc<dyn Fn(&Change<'_, T>)>;

/// Where a derived state gets its next value from.
pub(crate) trait ValueSource<T> {
    fn compute(&self) -> Result<T>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateConfig {
    pub key: Option<Key>,
    /// Start as a referenced-but-unset value.
    pub is_placeholder: bool,
}

impl StateConfig {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn placeholder(mut self) -> Self {
        self.is_placeholder = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchConfig {
    pub add_new_properties: bool,
    pub ingest: IngestConfig,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            add_new_properties: true,
            ingest: IngestConfig::default(),
        }
    }
}

struct StateData<T> {
    value: T,
    previous: T,
    initial: T,
    next: T,
    is_set: bool,
    is_placeholder: bool,
}

pub struct StateObserver<T: StateValue> {
    core: ObserverCore,
    data: RefCell<StateData<T>>,
    compute_value: RefCell<Option<Rc<dyn Fn(T) -> T>>>,
    compute_exists: RefCell<Option<Rc<dyn Fn(&T) -> bool>>>,
    source: RefCell<Option<Rc<dyn ValueSource<T>>>>,
    watchers: RefCell<IndexMap<String, WatcherFn<T>>>,
    side_effects: RefCell<SideEffectList<SideEffectFn<T>>>,
    pub(crate) persistent: RefCell<Option<Rc<StatePersistent>>>,
    watcher_seq: Cell<u64>,
}

impl<T: StateValue> StateObserver<T> {
    fn new(hub: &Hub, initial: T, config: StateConfig) -> Self {
        let core = ObserverCore::new(hub, config.key);
        match serde_json::to_value(&initial) {
            Ok(value) => core.seed_value(value),
            Err(err) => warn!(state = %core.label(), error = %err, "state.unserializable"),
        }
        Self {
            core,
            data: RefCell::new(StateData {
                value: initial.clone(),
                previous: initial.clone(),
                initial: initial.clone(),
                next: initial,
                is_set: false,
                is_placeholder: config.is_placeholder,
            }),
            compute_value: RefCell::new(None),
            compute_exists: RefCell::new(None),
            source: RefCell::new(None),
            watchers: RefCell::new(IndexMap::new()),
            side_effects: RefCell::new(SideEffectList::new()),
            persistent: RefCell::new(None),
            watcher_seq: Cell::new(0),
        }
    }

    /// Turn `value` into a job, unless it changes nothing.
    ///
    /// The compute-value transform runs first. A placeholder always
    /// proceeds, forced and overwriting.
    pub fn ingest_value(self: &Rc<Self>, value: T, config: IngestConfig) -> Result<()> {
        let mut config = config;
        let transform = self.compute_value.borrow().clone();
        let value = match transform {
            Some(transform) => transform(value),
            None => value,
        };
        let (placeholder, unchanged) = {
            let data = self.data.borrow();
            (data.is_placeholder, data.value == value)
        };
        if placeholder {
            config.force = true;
            config.overwrite = true;
        }
        if unchanged && !config.force {
            trace!(state = %self.core.label(), "state.unchanged");
            return Ok(());
        }
        let observer: Rc<dyn Observer> = Rc::clone(self) as Rc<dyn Observer>;
        ingest_job(observer, Some(Box::new(value)), config)
    }

    pub(crate) fn set_source(&self, source: Rc<dyn ValueSource<T>>) {
        *self.source.borrow_mut() = Some(source);
    }

    fn track_read(self: &Rc<Self>) {
        if let Some(hub) = self.core.weak_hub().upgrade()
            && hub.tracker().is_tracking()
        {
            let observer: Rc<dyn Observer> = Rc::clone(self) as Rc<dyn Observer>;
            hub.tracker().tracked(&observer);
        }
    }

    fn run_side_effects(&self, job: &RuntimeJob, value: &T, previous: &T) {
        let watchers: Vec<(String, WatcherFn<T>)> = self
            .watchers
            .borrow()
            .iter()
            .map(|(key, watcher)| (key.clone(), Rc::clone(watcher)))
            .collect();
        for (key, watcher) in &watchers {
            watcher(value, key);
        }

        let effects = self
            .side_effects
            .borrow()
            .runnable(&job.config().side_effects);
        let change = Change {
            value,
            previous,
            config: job.config(),
        };
        for (_, effect) in effects {
            effect(&change);
        }
    }
}

impl<T: StateValue> Observer for StateObserver<T> {
    fn core(&self) -> &ObserverCore {
        &self.core
    }

    fn ingest(self: Rc<Self>, config: IngestConfig) -> Result<()> {
        let source = self.source.borrow().clone();
        let value = match source {
            Some(source) => source.compute()?,
            None => self.data.borrow().next.clone(),
        };
        self.ingest_value(value, config)
    }

    fn perform(&self, job: &RuntimeJob) -> Result<()> {
        let next = job
            .take_payload::<T>()
            .ok_or_else(|| RippleError::MissingPayload {
                observer: self.core.label(),
            })?;
        let next_json = serde_json::to_value(&next)?;
        let current_json = serde_json::to_value(&self.data.borrow().value)?;

        let previous = {
            let mut data = self.data.borrow_mut();
            let previous = std::mem::replace(&mut data.value, next.clone());
            data.previous = previous.clone();
            data.next = next.clone();
            if job.config().overwrite {
                data.initial = next.clone();
                data.is_placeholder = false;
            }
            data.is_set = data.value != data.initial;
            previous
        };
        self.core.commit_values(next_json, current_json);
        trace!(state = %self.core.label(), job = job.id().get(), "state.performed");

        self.run_side_effects(job, &next, &previous);
        Ok(())
    }
}

/// Handle to an observable value. Clones share the value.
pub struct State<T: StateValue> {
    observer: Rc<StateObserver<T>>,
}

impl<T: StateValue> Clone for State<T> {
    fn clone(&self) -> Self {
        Self {
            observer: Rc::clone(&self.observer),
        }
    }
}

impl<T: StateValue + fmt::Debug> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.observer.data.borrow();
        f.debug_struct("State")
            .field("key", &self.observer.core.key())
            .field("value", &data.value)
            .field("is_set", &data.is_set)
            .field("is_placeholder", &data.is_placeholder)
            .finish()
    }
}

impl<T: StateValue> Observable for State<T> {
    fn observer(&self) -> Rc<dyn Observer> {
        Rc::clone(&self.observer) as Rc<dyn Observer>
    }
}

impl<T: StateValue> State<T> {
    pub fn new(hub: &Hub, initial: T) -> Self {
        Self::with_config(hub, initial, StateConfig::default())
    }

    pub fn with_config(hub: &Hub, initial: T, config: StateConfig) -> Self {
        Self {
            observer: Rc::new(StateObserver::new(hub, initial, config)),
        }
    }

    /// A state that has been referenced but never assigned. `value` stands
    /// in until the first `set`.
    pub fn placeholder(hub: &Hub, value: T) -> Self {
        Self::with_config(hub, value, StateConfig::default().placeholder())
    }

    pub(crate) fn from_observer(observer: Rc<StateObserver<T>>) -> Self {
        Self { observer }
    }

    pub(crate) fn downgrade(&self) -> Weak<StateObserver<T>> {
        Rc::downgrade(&self.observer)
    }

    #[must_use]
    pub fn state_observer(&self) -> &Rc<StateObserver<T>> {
        &self.observer
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.observer, &other.observer)
    }

    pub fn hub(&self) -> Result<Hub> {
        self.observer.core.hub()
    }

    // ─── Identity ────────────────────────────────────────────────────────

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.observer.core.key()
    }

    /// Rename the state. A persistent stored under the old key moves to the
    /// new one.
    pub fn set_key(&self, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        let old = self.observer.core.key();
        self.observer.core.set_key(Some(key.clone()));
        let persistent = self.observer.persistent.borrow().clone();
        if let Some(persistent) = persistent
            && old.as_ref().is_some_and(|old| persistent.key() == old.to_string())
        {
            persistent.rekey(&key.to_string(), &serde_json::to_value(self.peek())?)?;
        }
        Ok(())
    }

    // ─── Reads ───────────────────────────────────────────────────────────

    /// Current value. Recorded as a dependency while a computed evaluates.
    #[must_use]
    pub fn value(&self) -> T {
        self.observer.track_read();
        self.peek()
    }

    /// Current value without dependency tracking.
    #[must_use]
    pub fn peek(&self) -> T {
        self.observer.data.borrow().value.clone()
    }

    #[must_use]
    pub fn previous_value(&self) -> T {
        self.observer.data.borrow().previous.clone()
    }

    #[must_use]
    pub fn initial_value(&self) -> T {
        self.observer.data.borrow().initial.clone()
    }

    #[must_use]
    pub fn next_value(&self) -> T {
        self.observer.data.borrow().next.clone()
    }

    /// Whether the value has diverged from the initial value.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.observer.data.borrow().is_set
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.observer.data.borrow().is_placeholder
    }

    pub(crate) fn mark_placeholder(&self) {
        self.observer.data.borrow_mut().is_placeholder = true;
    }

    /// Whether the state holds a real value: the compute-exists check if one
    /// is set, otherwise not a placeholder and not `null`.
    #[must_use]
    pub fn exists(&self) -> bool {
        let check = self.observer.compute_exists.borrow().clone();
        let value = self.peek();
        match check {
            Some(check) => check(&value),
            None => {
                !self.is_placeholder()
                    && serde_json::to_value(&value).is_ok_and(|v| !v.is_null())
            }
        }
    }

    // ─── Mutations ───────────────────────────────────────────────────────

    pub fn set(&self, value: T) -> Result<()> {
        self.set_with(value, IngestConfig::default())
    }

    pub fn set_with(&self, value: T, config: IngestConfig) -> Result<()> {
        self.observer.ingest_value(value, config)
    }

    /// Re-ingest the next value (or recompute, for derived states).
    pub fn ingest(&self, config: IngestConfig) -> Result<()> {
        Rc::clone(&self.observer).ingest(config)
    }

    /// Go back to the previous value.
    pub fn undo(&self) -> Result<()> {
        self.set(self.previous_value())
    }

    /// Go back to the initial value.
    pub fn reset(&self) -> Result<()> {
        self.set(self.initial_value())
    }

    /// Shallow-merge `changes` into an object-shaped value.
    pub fn patch(&self, changes: Value, config: PatchConfig) -> Result<()> {
        let changes = json::expect_object(changes)?;
        let mut current = json::expect_object(serde_json::to_value(self.next_value())?)?;
        json::merge(&mut current, changes, config.add_new_properties);
        let value: T = serde_json::from_value(Value::Object(current))?;
        self.set_with(value, config.ingest)
    }

    /// Transform every future value before it is ingested. The current next
    /// value is re-ingested through the transform.
    pub fn compute_value(&self, f: impl Fn(T) -> T + 'static) -> Result<()> {
        *self.observer.compute_value.borrow_mut() = Some(Rc::new(f));
        self.set(self.next_value())
    }

    pub fn compute_exists(&self, f: impl Fn(&T) -> bool + 'static) {
        *self.observer.compute_exists.borrow_mut() = Some(Rc::new(f));
    }

    // ─── Watchers ────────────────────────────────────────────────────────

    /// Call `f` after every commit. Returns the generated watcher key.
    pub fn watch(&self, f: impl Fn(&T, &str) + 'static) -> String {
        let seq = self.observer.watcher_seq.get() + 1;
        self.observer.watcher_seq.set(seq);
        let key = format!("watcher_{seq}");
        self.observer
            .watchers
            .borrow_mut()
            .insert(key.clone(), Rc::new(f));
        key
    }

    pub fn watch_with_key(&self, key: impl Into<String>, f: impl Fn(&T, &str) + 'static) -> Result<()> {
        let key = key.into();
        let mut watchers = self.observer.watchers.borrow_mut();
        if watchers.contains_key(&key) {
            warn!(state = %self.observer.core.label(), watcher = %key, "state.duplicate_watcher");
            return Err(RippleError::duplicate_key("watcher", key));
        }
        watchers.insert(key, Rc::new(f));
        Ok(())
    }

    pub fn remove_watcher(&self, key: &str) -> bool {
        self.observer
            .watchers
            .borrow_mut()
            .shift_remove(key)
            .is_some()
    }

    #[must_use]
    pub fn has_watcher(&self, key: &str) -> bool {
        self.observer.watchers.borrow().contains_key(key)
    }

    // ─── Side effects ────────────────────────────────────────────────────

    /// Register an internal side effect. Higher weights run first; an
    /// existing side effect under `key` is replaced.
    pub fn add_side_effect(
        &self,
        key: impl Into<String>,
        weight: i32,
        f: impl Fn(&Change<'_, T>) + 'static,
    ) {
        self.observer
            .side_effects
            .borrow_mut()
            .insert(key, weight, Rc::new(f));
    }

    pub fn remove_side_effect(&self, key: &str) -> bool {
        self.observer.side_effects.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn has_side_effect(&self, key: &str) -> bool {
        self.observer.side_effects.borrow().contains(key)
    }
}
