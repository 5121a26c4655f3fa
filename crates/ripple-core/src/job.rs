#![forbid(unsafe_code)]

//! Runtime jobs: one pending value transition each.
//!
//! A [`RuntimeJob`] is created per mutation, handed to the runtime exactly
//! once, performed once and then dropped. Its configuration is fixed at
//! creation; only the render bookkeeping (which containers still need an
//! update, how often the update was retried) changes afterwards.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::key::Key;
use crate::observer::{Observer, ObserverId};
use crate::subscription::{ContainerId, SubscriptionContainer};

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// `created` → `queued` → `performed`. There is no failed state: a job either
/// commits fully or is never performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Queued,
    Performed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideEffectConfig {
    pub enabled: bool,
    /// Side-effect keys to skip for this job.
    pub exclude: Vec<String>,
}

impl Default for SideEffectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            exclude: Vec::new(),
        }
    }
}

impl SideEffectConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            exclude: Vec::new(),
        }
    }

    #[must_use]
    pub fn excluding<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled: true,
            exclude: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether the side effect registered under `key` should run.
    #[must_use]
    pub fn allows(&self, key: &str) -> bool {
        self.enabled && !self.exclude.iter().any(|k| k == key)
    }
}

/// The chain of observers whose changes led to a job. Used to detect cycles
/// while dependents propagate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Trail {
    steps: Vec<(ObserverId, String)>,
}

impl Trail {
    #[must_use]
    pub fn contains(&self, id: ObserverId) -> bool {
        self.steps.iter().any(|(step, _)| *step == id)
    }

    /// A new trail with one more step appended.
    #[must_use]
    pub fn with(&self, id: ObserverId, label: impl Into<String>) -> Self {
        let mut steps = self.steps.clone();
        steps.push((id, label.into()));
        Self { steps }
    }

    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.steps.iter().map(|(_, label)| label.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Options for a single ingest call.
///
/// Defaults: perform immediately, not background, side effects enabled with
/// nothing excluded, not forced, write to storage, no overwrite, retry budget
/// from the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    pub perform: bool,
    pub background: bool,
    pub force: bool,
    pub side_effects: SideEffectConfig,
    /// `None` uses the hub's `max_tries_to_update`.
    pub max_tries_to_update: Option<u32>,
    pub storage: bool,
    pub overwrite: bool,
    pub key: Option<Key>,
    pub trail: Trail,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            perform: true,
            background: false,
            force: false,
            side_effects: SideEffectConfig::default(),
            max_tries_to_update: None,
            storage: true,
            overwrite: false,
            key: None,
            trail: Trail::default(),
        }
    }
}

impl IngestConfig {
    #[must_use]
    pub fn with_perform(mut self, perform: bool) -> Self {
        self.perform = perform;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    #[must_use]
    pub fn with_side_effects(mut self, side_effects: SideEffectConfig) -> Self {
        self.side_effects = side_effects;
        self
    }

    #[must_use]
    pub fn with_max_tries_to_update(mut self, tries: u32) -> Self {
        self.max_tries_to_update = Some(tries);
        self
    }

    #[must_use]
    pub fn with_storage(mut self, storage: bool) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_trail(mut self, trail: Trail) -> Self {
        self.trail = trail;
        self
    }
}

/// Resolved, immutable job configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobConfig {
    pub background: bool,
    pub force: bool,
    pub side_effects: SideEffectConfig,
    /// `None` retries forever.
    pub max_tries_to_update: Option<u32>,
    pub storage: bool,
    pub overwrite: bool,
    pub key: Option<Key>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self::from_ingest(&IngestConfig::default(), None)
    }
}

impl JobConfig {
    #[must_use]
    pub fn from_ingest(config: &IngestConfig, max_tries_to_update: Option<u32>) -> Self {
        Self {
            background: config.background,
            force: config.force,
            side_effects: config.side_effects.clone(),
            max_tries_to_update,
            storage: config.storage,
            overwrite: config.overwrite,
            key: config.key.clone(),
        }
    }
}

pub struct RuntimeJob {
    id: JobId,
    observer: Rc<dyn Observer>,
    config: JobConfig,
    trail: Trail,
    state: Cell<JobState>,
    rerender: bool,
    containers_to_update: RefCell<IndexMap<ContainerId, Rc<SubscriptionContainer>>>,
    tries_to_update: Cell<u32>,
    payload: RefCell<Option<Box<dyn Any>>>,
}

impl fmt::Debug for RuntimeJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeJob")
            .field("id", &self.id)
            .field("observer", &self.observer.core().label())
            .field("config", &self.config)
            .field("state", &self.state.get())
            .field("rerender", &self.rerender)
            .field("containers", &self.containers_to_update.borrow().len())
            .field("tries_to_update", &self.tries_to_update.get())
            .finish_non_exhaustive()
    }
}

impl RuntimeJob {
    /// Snapshot the observer's containers. A job rerenders when it is not a
    /// background job and at least one container was subscribed at creation.
    #[must_use]
    pub fn new(observer: Rc<dyn Observer>, config: JobConfig, trail: Trail) -> Self {
        let containers = observer.core().subscribed_to();
        let rerender = !config.background && !containers.is_empty();
        Self {
            id: JobId::next(),
            observer,
            config,
            trail,
            state: Cell::new(JobState::Created),
            rerender,
            containers_to_update: RefCell::new(if rerender {
                containers
            } else {
                IndexMap::new()
            }),
            tries_to_update: Cell::new(0),
            payload: RefCell::new(None),
        }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn observer(&self) -> &Rc<dyn Observer> {
        &self.observer
    }

    #[must_use]
    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    #[must_use]
    pub fn trail(&self) -> &Trail {
        &self.trail
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.state.set(state);
    }

    #[must_use]
    pub fn performed(&self) -> bool {
        self.state.get() == JobState::Performed
    }

    #[must_use]
    pub fn rerender(&self) -> bool {
        self.rerender
    }

    #[must_use]
    pub fn tries_to_update(&self) -> u32 {
        self.tries_to_update.get()
    }

    pub(crate) fn bump_tries(&self) -> u32 {
        let tries = self.tries_to_update.get().saturating_add(1);
        self.tries_to_update.set(tries);
        tries
    }

    /// Containers that have not received this job's render signal yet.
    #[must_use]
    pub fn containers_to_update(&self) -> Vec<Rc<SubscriptionContainer>> {
        self.containers_to_update.borrow().values().cloned().collect()
    }

    pub(crate) fn remove_container(&self, id: ContainerId) {
        self.containers_to_update.borrow_mut().shift_remove(&id);
    }

    pub(crate) fn clear_containers(&self) {
        self.containers_to_update.borrow_mut().clear();
    }

    pub fn set_payload(&self, payload: Box<dyn Any>) {
        *self.payload.borrow_mut() = Some(payload);
    }

    /// Take the payload if it is a `T`. A payload of another type stays in
    /// place.
    pub fn take_payload<T: 'static>(&self) -> Option<T> {
        let boxed = self.payload.borrow_mut().take()?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *self.payload.borrow_mut() = Some(other);
                None
            }
        }
    }

    #[must_use]
    pub fn has_payload(&self) -> bool {
        self.payload.borrow().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_effect_config_allows() {
        let config = SideEffectConfig::excluding(["X"]);
        assert!(!config.allows("X"));
        assert!(config.allows("Y"));
        assert!(!SideEffectConfig::disabled().allows("Y"));
    }

    #[test]
    fn trail_tracks_steps() {
        let a = ObserverId::from_raw(10_000);
        let b = ObserverId::from_raw(10_001);
        let trail = Trail::default().with(a, "a").with(b, "b");
        assert!(trail.contains(a));
        assert!(trail.contains(b));
        assert!(!trail.contains(ObserverId::from_raw(10_002)));
        assert_eq!(trail.labels(), vec!["a".to_owned(), "b".to_owned()]);
        assert_eq!(trail.len(), 2);
    }

    #[test]
    fn job_config_resolves_from_ingest() {
        let ingest = IngestConfig::default()
            .with_force(true)
            .with_background(true)
            .with_storage(false);
        let config = JobConfig::from_ingest(&ingest, Some(5));
        assert!(config.force);
        assert!(config.background);
        assert!(!config.storage);
        assert_eq!(config.max_tries_to_update, Some(5));
        assert!(config.side_effects.enabled);
    }

    #[test]
    fn ingest_defaults() {
        let config = IngestConfig::default();
        assert!(config.perform);
        assert!(!config.force);
        assert!(config.storage);
        assert!(!config.overwrite);
        assert!(config.trail.is_empty());
    }
}
