#![forbid(unsafe_code)]

//! Derived values with automatic dependency detection.
//!
//! # Design
//!
//! A [`Computed<T>`] is a [`State<T>`] whose observer pulls its next value
//! from a compute function instead of from `set`. Every evaluation runs
//! inside a [`ComputedTracker`](ripple_core::ComputedTracker) frame; the
//! observers read during the frame, plus any hard-coded dependencies,
//! become the new dependency set. The computed registers itself as a
//! dependent of each, so the runtime re-ingests it when any of them commits.
//!
//! # Invariants
//!
//! 1. After an evaluation, the computed is a dependent of exactly the
//!    observers in [`Computed::deps`].
//! 2. A computed never depends on itself.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use tracing::trace;

use ripple_core::{
    Hub, IngestConfig, Observable, Observer, ObserverId, Result, RippleError, WeakHub,
};

use crate::state::{State, StateObserver, StateValue, ValueSource};

type ComputeFn<T> = Rc<dyn Fn() -> T>;

struct ComputedInner<T: StateValue> {
    compute: RefCell<ComputeFn<T>>,
    hard_deps: RefCell<Vec<Rc<dyn Observer>>>,
    deps: RefCell<IndexMap<ObserverId, Weak<dyn Observer>>>,
    hub: WeakHub,
    target: RefCell<Weak<StateObserver<T>>>,
}

impl<T: StateValue> ComputedInner<T> {
    fn evaluate(&self, hub: &Hub) -> (T, Vec<Rc<dyn Observer>>) {
        let compute = Rc::clone(&self.compute.borrow());
        hub.tracker().track_with(|| compute())
    }

    /// Swap the dependency edges over to `tracked` plus the hard deps.
    fn rewire(&self, tracked: Vec<Rc<dyn Observer>>) {
        let Some(target) = self.target.borrow().upgrade() else {
            return;
        };
        let target: Rc<dyn Observer> = target;
        let own_id = target.core().id();

        let next: IndexMap<ObserverId, Rc<dyn Observer>> = self
            .hard_deps
            .borrow()
            .iter()
            .cloned()
            .chain(tracked)
            .filter(|dep| dep.core().id() != own_id)
            .map(|dep| (dep.core().id(), dep))
            .collect();

        for (id, old) in self.deps.borrow().iter() {
            if !next.contains_key(id)
                && let Some(old) = old.upgrade()
            {
                old.core().remove_dependent(own_id);
            }
        }
        for dep in next.values() {
            dep.core().add_dependent(&target);
        }
        trace!(computed = %target.core().label(), deps = next.len(), "computed.rewired");
        *self.deps.borrow_mut() = next
            .iter()
            .map(|(id, dep)| (*id, Rc::downgrade(dep)))
            .collect();
    }
}

impl<T: StateValue> ValueSource<T> for ComputedInner<T> {
    fn compute(&self) -> Result<T> {
        let hub = self.hub.upgrade().ok_or(RippleError::dropped("hub"))?;
        let (value, tracked) = self.evaluate(&hub);
        self.rewire(tracked);
        Ok(value)
    }
}

/// A value derived from other observables.
pub struct Computed<T: StateValue> {
    state: State<T>,
    inner: Rc<ComputedInner<T>>,
}

impl<T: StateValue> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: StateValue + fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("state", &self.state)
            .field("deps", &self.inner.deps.borrow().len())
            .finish()
    }
}

impl<T: StateValue> Observable for Computed<T> {
    fn observer(&self) -> Rc<dyn Observer> {
        self.state.observer()
    }
}

impl<T: StateValue> Computed<T> {
    pub fn new(hub: &Hub, compute: impl Fn() -> T + 'static) -> Self {
        Self::with_deps(hub, compute, &[])
    }

    /// Like [`new`](Self::new), with `deps` treated as dependencies whether
    /// or not the compute function reads them.
    pub fn with_deps(
        hub: &Hub,
        compute: impl Fn() -> T + 'static,
        deps: &[&dyn Observable],
    ) -> Self {
        let inner = Rc::new(ComputedInner {
            compute: RefCell::new(Rc::new(compute)),
            hard_deps: RefCell::new(deps.iter().map(|dep| dep.observer()).collect()),
            deps: RefCell::new(IndexMap::new()),
            hub: hub.downgrade(),
            target: RefCell::new(Weak::new()),
        });
        let (initial, tracked) = inner.evaluate(hub);
        let state = State::new(hub, initial);
        *inner.target.borrow_mut() = state.downgrade();
        inner.rewire(tracked);
        state
            .state_observer()
            .set_source(Rc::clone(&inner) as Rc<dyn ValueSource<T>>);
        Self { state, inner }
    }

    /// Current value. Tracked, so computeds can build on computeds.
    #[must_use]
    pub fn value(&self) -> T {
        self.state.value()
    }

    #[must_use]
    pub fn peek(&self) -> T {
        self.state.peek()
    }

    /// The backing state, for watchers, keys and persistence.
    #[must_use]
    pub fn state(&self) -> &State<T> {
        &self.state
    }

    /// Evaluate again and ingest the result.
    pub fn recompute(&self, config: IngestConfig) -> Result<()> {
        self.state.ingest(config)
    }

    /// Replace the compute function and hard-coded deps, then recompute.
    pub fn update_compute_function(
        &self,
        compute: impl Fn() -> T + 'static,
        deps: &[&dyn Observable],
    ) -> Result<()> {
        *self.inner.compute.borrow_mut() = Rc::new(compute);
        *self.inner.hard_deps.borrow_mut() = deps.iter().map(|dep| dep.observer()).collect();
        self.recompute(IngestConfig::default())
    }

    /// Observers the last evaluation depended on.
    #[must_use]
    pub fn deps(&self) -> Vec<Rc<dyn Observer>> {
        self.inner
            .deps
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }
}
