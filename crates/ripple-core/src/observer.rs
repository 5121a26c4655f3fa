#![forbid(unsafe_code)]

//! Dependency-graph nodes.
//!
//! # Design
//!
//! Every primitive owns one concrete observer type (a state observer, a
//! group observer, an event observer) and hands it out as
//! `Rc<dyn Observer>`. The shared bookkeeping lives in [`ObserverCore`]:
//! identity, the last committed public value, the dependents to re-ingest
//! after a change, and the subscription containers fed by this observer.
//!
//! Edges are weak in the dependent direction (`Weak<dyn Observer>`), so a
//! computed value that is dropped stops being notified without explicit
//! cleanup. Containers are held strongly by the observers that feed them and
//! hold their subscribers weakly.
//!
//! # Invariants
//!
//! 1. [`ObserverCore::add_dependent`] is idempotent: the dependent set is
//!    keyed by [`ObserverId`].
//! 2. The public value snapshot is only refreshed from the owning observer's
//!    `perform`, which only the runtime calls.
//! 3. Dead dependents are pruned lazily when the dependent set is read.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{Result, RippleError};
use crate::hub::{Hub, WeakHub};
use crate::job::{IngestConfig, JobConfig, RuntimeJob};
use crate::key::Key;
use crate::subscription::{ContainerId, SubscriptionContainer};

// ─── Observer ID generation ──────────────────────────────────────────────────

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique observer identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

impl ObserverId {
    fn next() -> Self {
        Self(NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

// ─── Observer trait ──────────────────────────────────────────────────────────

/// A node in the dependency graph.
///
/// Concrete observers override [`ingest`](Observer::ingest) to compute their
/// next value and [`perform`](Observer::perform) to commit it.
pub trait Observer {
    fn core(&self) -> &ObserverCore;

    /// Recompute and hand a job to the runtime.
    ///
    /// The runtime calls this on every dependent after a change. The base
    /// implementation does nothing.
    fn ingest(self: Rc<Self>, config: IngestConfig) -> Result<()> {
        let _ = config;
        Ok(())
    }

    /// Commit `job`.
    ///
    /// Only the runtime calls this. The base implementation reports a
    /// diagnostic and returns [`RippleError::AbstractPerform`].
    fn perform(&self, job: &RuntimeJob) -> Result<()> {
        let _ = job;
        let observer = self.core().label();
        warn!(observer = %observer, "observer.abstract_perform");
        Err(RippleError::AbstractPerform { observer })
    }
}

impl fmt::Debug for dyn Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.core(), f)
    }
}

/// Anything that is backed by an observer: states, computeds, events,
/// groups, selectors.
pub trait Observable {
    fn observer(&self) -> Rc<dyn Observer>;
}

impl Observable for Rc<dyn Observer> {
    fn observer(&self) -> Rc<dyn Observer> {
        Rc::clone(self)
    }
}

/// Build a job for `observer` and hand it to its hub's runtime.
///
/// `payload` travels with the job and is read back in `perform` through
/// [`RuntimeJob::take_payload`]. A per-job retry budget falls back to the
/// hub's configured default.
pub fn ingest_job(
    observer: Rc<dyn Observer>,
    payload: Option<Box<dyn Any>>,
    config: IngestConfig,
) -> Result<()> {
    let hub = observer.core().hub()?;
    let max_tries = config
        .max_tries_to_update
        .or(hub.config().max_tries_to_update);
    let job_config = JobConfig::from_ingest(&config, max_tries);
    let job = RuntimeJob::new(observer, job_config, config.trail);
    if let Some(payload) = payload {
        job.set_payload(payload);
    }
    hub.runtime().ingest(job, config.perform)
}

// ─── Shared observer state ───────────────────────────────────────────────────

pub struct ObserverCore {
    id: ObserverId,
    key: RefCell<Option<Key>>,
    hub: WeakHub,
    value: RefCell<Option<Value>>,
    previous_value: RefCell<Option<Value>>,
    dependents: RefCell<IndexMap<ObserverId, Weak<dyn Observer>>>,
    subscribed_to: RefCell<IndexMap<ContainerId, Rc<SubscriptionContainer>>>,
}

impl fmt::Debug for ObserverCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverCore")
            .field("id", &self.id)
            .field("key", &self.key.borrow())
            .field("value", &self.value.borrow())
            .field("dependents", &self.dependents.borrow().len())
            .field("subscribed_to", &self.subscribed_to.borrow().len())
            .finish()
    }
}

impl ObserverCore {
    #[must_use]
    pub fn new(hub: &Hub, key: Option<Key>) -> Self {
        Self {
            id: ObserverId::next(),
            key: RefCell::new(key),
            hub: hub.downgrade(),
            value: RefCell::new(None),
            previous_value: RefCell::new(None),
            dependents: RefCell::new(IndexMap::new()),
            subscribed_to: RefCell::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ObserverId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.key.borrow().clone()
    }

    pub fn set_key(&self, key: Option<Key>) {
        *self.key.borrow_mut() = key;
    }

    /// Key if present, otherwise the observer id. Used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        match &*self.key.borrow() {
            Some(key) => key.to_string(),
            None => self.id.to_string(),
        }
    }

    /// The owning hub, or [`RippleError::Dropped`] once it is gone.
    pub fn hub(&self) -> Result<Hub> {
        self.hub.upgrade().ok_or(RippleError::dropped("hub"))
    }

    #[must_use]
    pub fn weak_hub(&self) -> &WeakHub {
        &self.hub
    }

    /// Last committed public value.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    #[must_use]
    pub fn previous_value(&self) -> Option<Value> {
        self.previous_value.borrow().clone()
    }

    /// Refresh the public snapshot. Call from `perform` only.
    pub fn commit_values(&self, value: Value, previous: Value) {
        *self.value.borrow_mut() = Some(value);
        *self.previous_value.borrow_mut() = Some(previous);
    }

    /// Seed the public value without a job, for construction.
    pub fn seed_value(&self, value: Value) {
        *self.previous_value.borrow_mut() = Some(value.clone());
        *self.value.borrow_mut() = Some(value);
    }

    /// Register `observer` to be re-ingested after this one changes.
    pub fn add_dependent(&self, observer: &Rc<dyn Observer>) {
        let id = observer.core().id();
        let mut dependents = self.dependents.borrow_mut();
        if dependents.contains_key(&id) {
            return;
        }
        dependents.insert(id, Rc::downgrade(observer));
        trace!(observer = %self.label(), dependent = %id, "observer.depend");
    }

    pub fn remove_dependent(&self, id: ObserverId) -> bool {
        self.dependents.borrow_mut().shift_remove(&id).is_some()
    }

    #[must_use]
    pub fn has_dependent(&self, id: ObserverId) -> bool {
        self.dependents.borrow().contains_key(&id)
    }

    /// Live dependents in registration order.
    #[must_use]
    pub fn dependents(&self) -> Vec<Rc<dyn Observer>> {
        let mut dependents = self.dependents.borrow_mut();
        dependents.retain(|_, weak| weak.strong_count() > 0);
        dependents.values().filter_map(Weak::upgrade).collect()
    }

    #[must_use]
    pub fn dependent_count(&self) -> usize {
        self.dependents().len()
    }

    pub fn subscribe(&self, container: Rc<SubscriptionContainer>) {
        self.subscribed_to
            .borrow_mut()
            .insert(container.id(), container);
    }

    pub fn unsubscribe(&self, id: ContainerId) -> bool {
        self.subscribed_to.borrow_mut().shift_remove(&id).is_some()
    }

    /// Snapshot of the containers this observer feeds.
    #[must_use]
    pub fn subscribed_to(&self) -> IndexMap<ContainerId, Rc<SubscriptionContainer>> {
        self.subscribed_to.borrow().clone()
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        !self.subscribed_to.borrow().is_empty()
    }
}
