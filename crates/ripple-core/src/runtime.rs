#![forbid(unsafe_code)]

//! The job queue and UI flush scheduler.
//!
//! # Design
//!
//! Mutations arrive as [`RuntimeJob`]s. The runtime performs them strictly in
//! ingestion order, propagates each change to the observer's dependents, and
//! remembers every job that needs a render signal. Rendering happens in a
//! separate flush step ([`Runtime::update_subscribers`]) that merges all
//! remembered jobs into one set of subscription containers, so each
//! container is notified at most once per flush.
//!
//! When the flush runs depends on the hub's `bucket` setting:
//!
//! - `bucket = false`: right after the queue drains.
//! - `bucket = true` with a scheduler: one scheduled task per pending batch.
//! - `bucket = true` without a scheduler: when the host calls
//!   [`Hub::flush`](crate::Hub::flush).
//!
//! [`Runtime::batch`] holds back the flush until the closure returns.
//!
//! # Invariants
//!
//! 1. Jobs are performed in FIFO order; `perform` never nests. Jobs ingested
//!    while the queue drains are appended and drained by the same loop.
//! 2. A container receives at most one render signal per flush.
//! 3. A render signal aimed at a not-ready container is retried on later
//!    flushes until the job's `max_tries_to_update` is reached, then dropped.
//!    The committed value is never rolled back.
//! 4. A dependent that already appears in a job's trail is not re-ingested;
//!    the cycle is reported as a fault.
//!
//! # Failure Modes
//!
//! - **Perform error**: logged and recorded in [`Runtime::take_faults`]; the
//!   job is not counted as performed and nothing propagates from it.
//! - **Dependent ingest error**: logged and recorded; other dependents still
//!   run.
//! - **Hub dropped**: the flush becomes a no-op.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, debug_span, error, trace, warn};
use web_time::Instant;

use crate::error::{Result, RippleError};
use crate::hub::WeakHub;
use crate::job::{IngestConfig, JobId, JobState, RuntimeJob};
use crate::subscription::{ContainerId, ContainerKind, SubscriptionContainer};

/// Hands a flush task to the host's event loop.
pub type Scheduler = Rc<dyn Fn(Box<dyn FnOnce()>)>;

/// Monotonic counters, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeStats {
    pub jobs_ingested: u64,
    pub jobs_performed: u64,
    pub flushes: u64,
    pub container_updates: u64,
    pub dropped_updates: u64,
    pub cycles_detected: u64,
}

pub struct Runtime {
    hub: WeakHub,
    queue: RefCell<VecDeque<Rc<RuntimeJob>>>,
    performing: Cell<bool>,
    flushing: Cell<bool>,
    current_job: RefCell<Option<Rc<RuntimeJob>>>,
    jobs_to_rerender: RefCell<Vec<Rc<RuntimeJob>>>,
    not_ready_jobs: RefCell<IndexMap<JobId, Rc<RuntimeJob>>>,
    batch_depth: Cell<u32>,
    flush_scheduled: Cell<bool>,
    scheduler: RefCell<Option<Scheduler>>,
    faults: RefCell<Vec<RippleError>>,
    stats: Cell<RuntimeStats>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("queued", &self.queue.borrow().len())
            .field("performing", &self.performing.get())
            .field("jobs_to_rerender", &self.jobs_to_rerender.borrow().len())
            .field("not_ready_jobs", &self.not_ready_jobs.borrow().len())
            .field("batch_depth", &self.batch_depth.get())
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}

/// Clears a flag on drop, so an unwinding callback cannot leave the runtime
/// stuck in a busy state.
struct FlagGuard<'a>(&'a Cell<bool>);

impl<'a> FlagGuard<'a> {
    fn set(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct BatchGuard<'a>(&'a Cell<u32>);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

impl Runtime {
    pub(crate) fn new(hub: WeakHub) -> Self {
        Self {
            hub,
            queue: RefCell::new(VecDeque::new()),
            performing: Cell::new(false),
            flushing: Cell::new(false),
            current_job: RefCell::new(None),
            jobs_to_rerender: RefCell::new(Vec::new()),
            not_ready_jobs: RefCell::new(IndexMap::new()),
            batch_depth: Cell::new(0),
            flush_scheduled: Cell::new(false),
            scheduler: RefCell::new(None),
            faults: RefCell::new(Vec::new()),
            stats: Cell::new(RuntimeStats::default()),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut RuntimeStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn record_fault(&self, fault: RippleError) {
        self.faults.borrow_mut().push(fault);
    }

    // ─── Ingest / perform ────────────────────────────────────────────────

    /// Queue `job` and, when `perform` is set and the runtime is idle, drain
    /// the queue.
    ///
    /// With `perform` unset the job waits for the next drain, which happens
    /// on the next performing ingest or on [`flush`](Self::flush).
    pub fn ingest(&self, job: RuntimeJob, perform: bool) -> Result<()> {
        job.set_state(JobState::Queued);
        let job = Rc::new(job);
        trace!(
            job = job.id().get(),
            observer = %job.observer().core().label(),
            perform,
            "runtime.ingest"
        );
        self.bump(|s| s.jobs_ingested += 1);
        self.queue.borrow_mut().push_back(job);

        if perform && !self.performing.get() {
            self.perform_queued();
        }
        Ok(())
    }

    /// Drain the queue, then request a flush.
    ///
    /// Does nothing if a drain is already running further up the stack.
    pub fn perform_queued(&self) {
        if self.performing.get() {
            return;
        }
        {
            let _performing = FlagGuard::set(&self.performing);
            loop {
                let next = self.queue.borrow_mut().pop_front();
                let Some(job) = next else {
                    break;
                };
                self.perform_job(&job);
            }
        }
        self.request_flush();
    }

    fn perform_job(&self, job: &Rc<RuntimeJob>) {
        *self.current_job.borrow_mut() = Some(Rc::clone(job));
        let result = job.observer().perform(job);
        *self.current_job.borrow_mut() = None;

        if let Err(err) = result {
            warn!(
                job = job.id().get(),
                observer = %job.observer().core().label(),
                error = %err,
                "runtime.perform_failed"
            );
            self.record_fault(err);
            return;
        }

        job.set_state(JobState::Performed);
        self.bump(|s| s.jobs_performed += 1);
        if job.rerender() {
            self.jobs_to_rerender.borrow_mut().push(Rc::clone(job));
        }
        self.propagate(job);
    }

    /// Re-ingest every dependent of the job's observer as a queued job.
    fn propagate(&self, job: &RuntimeJob) {
        let observer = job.observer();
        let dependents = observer.core().dependents();
        if dependents.is_empty() {
            return;
        }
        let trail = job
            .trail()
            .with(observer.core().id(), observer.core().label());

        for dependent in dependents {
            if trail.contains(dependent.core().id()) {
                let mut path = trail.labels();
                path.push(dependent.core().label());
                error!(path = ?path, "runtime.cycle");
                self.bump(|s| s.cycles_detected += 1);
                self.record_fault(RippleError::DependencyCycle { path });
                continue;
            }
            let config = IngestConfig::default()
                .with_perform(false)
                .with_trail(trail.clone());
            if let Err(err) = Rc::clone(&dependent).ingest(config) {
                warn!(
                    observer = %dependent.core().label(),
                    error = %err,
                    "runtime.dependent_failed"
                );
                self.record_fault(err);
            }
        }
    }

    /// The job being performed right now, if any.
    #[must_use]
    pub fn current_job(&self) -> Option<Rc<RuntimeJob>> {
        self.current_job.borrow().clone()
    }

    #[must_use]
    pub fn is_performing(&self) -> bool {
        self.performing.get()
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    // ─── Flush scheduling ────────────────────────────────────────────────

    /// Install the host's task scheduler. Replaces any previous one.
    pub fn set_scheduler(&self, scheduler: Scheduler) {
        *self.scheduler.borrow_mut() = Some(scheduler);
    }

    pub fn clear_scheduler(&self) {
        *self.scheduler.borrow_mut() = None;
    }

    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        !self.jobs_to_rerender.borrow().is_empty() || !self.not_ready_jobs.borrow().is_empty()
    }

    #[must_use]
    pub fn has_not_ready_jobs(&self) -> bool {
        !self.not_ready_jobs.borrow().is_empty()
    }

    /// Flush now, schedule a flush, or leave it to the host, depending on the
    /// hub's `bucket` setting and the installed scheduler.
    pub fn request_flush(&self) {
        if self.batch_depth.get() > 0 || self.performing.get() || self.flushing.get() {
            return;
        }
        if !self.has_pending_updates() {
            return;
        }
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        if !hub.config().bucket {
            self.update_subscribers();
            return;
        }
        let scheduler = self.scheduler.borrow().clone();
        if let Some(scheduler) = scheduler {
            if self.flush_scheduled.replace(true) {
                return;
            }
            let weak = self.hub.clone();
            trace!("runtime.flush_scheduled");
            scheduler(Box::new(move || {
                if let Some(hub) = weak.upgrade() {
                    hub.runtime().flush_scheduled.set(false);
                    hub.runtime().flush();
                }
            }));
        }
    }

    #[must_use]
    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled.get()
    }

    /// Drain the queue and notify every touched container.
    ///
    /// Returns the number of containers notified.
    pub fn flush(&self) -> usize {
        if !self.queue.borrow().is_empty() {
            let _hold = self.hold();
            self.perform_queued();
        }
        self.update_subscribers()
    }

    fn hold(&self) -> BatchGuard<'_> {
        self.batch_depth.set(self.batch_depth.get() + 1);
        BatchGuard(&self.batch_depth)
    }

    /// Run `f` with flushing held back, then request one flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        let result = {
            let _hold = self.hold();
            f()
        };
        self.request_flush();
        result
    }

    #[must_use]
    pub fn in_batch(&self) -> bool {
        self.batch_depth.get() > 0
    }

    // ─── Flush ───────────────────────────────────────────────────────────

    /// Merge all jobs waiting for a render signal and notify each touched
    /// container once.
    ///
    /// Returns the number of containers notified.
    pub fn update_subscribers(&self) -> usize {
        if self.performing.get() || self.flushing.get() {
            return 0;
        }
        let Some(hub) = self.hub.upgrade() else {
            return 0;
        };
        let _flushing = FlagGuard::set(&self.flushing);

        let span = debug_span!(
            "runtime.flush",
            jobs = tracing::field::Empty,
            containers = tracing::field::Empty,
            duration_us = tracing::field::Empty
        );
        let _entered = span.enter();
        let start = Instant::now();

        let mut jobs = std::mem::take(&mut *self.jobs_to_rerender.borrow_mut());
        jobs.extend(
            std::mem::take(&mut *self.not_ready_jobs.borrow_mut()).into_values(),
        );
        span.record("jobs", jobs.len());

        let mut containers: IndexMap<ContainerId, Rc<SubscriptionContainer>> = IndexMap::new();
        for job in &jobs {
            let mut waiting = false;
            for container in job.containers_to_update() {
                if !container.has_subscriber(job.observer().core().id()) {
                    job.remove_container(container.id());
                    continue;
                }
                if !container.is_ready() {
                    waiting = true;
                    continue;
                }
                if container.selection_changed(job.observer().as_ref()) {
                    container.mark_updated(job.observer());
                    containers.insert(container.id(), Rc::clone(&container));
                }
                job.remove_container(container.id());
            }
            if waiting {
                self.retry_later(job);
            }
        }

        for container in containers.values() {
            match container.kind() {
                ContainerKind::Callback(callback) => {
                    let callback = Rc::clone(callback);
                    container.take_updated_data();
                    callback();
                }
                ContainerKind::Component(component) => {
                    let data = container.take_updated_data();
                    hub.integrations().update(component, &data);
                }
            }
        }

        let updated = containers.len();
        self.bump(|s| {
            s.flushes += 1;
            s.container_updates += updated as u64;
        });
        span.record("containers", updated);
        span.record(
            "duration_us",
            u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        );
        debug!(jobs = jobs.len(), containers = updated, "runtime.flushed");

        drop(_entered);
        drop(_flushing);
        if !self.jobs_to_rerender.borrow().is_empty() {
            self.request_flush();
        }
        updated
    }

    fn retry_later(&self, job: &Rc<RuntimeJob>) {
        let tries = job.tries_to_update();
        let exhausted = job
            .config()
            .max_tries_to_update
            .is_some_and(|max| tries >= max);
        if exhausted {
            warn!(
                job = job.id().get(),
                observer = %job.observer().core().label(),
                tries,
                "runtime.job_dropped"
            );
            job.clear_containers();
            self.bump(|s| s.dropped_updates += 1);
            return;
        }
        let tries = job.bump_tries();
        debug!(
            job = job.id().get(),
            observer = %job.observer().core().label(),
            tries,
            "runtime.container_not_ready"
        );
        self.not_ready_jobs
            .borrow_mut()
            .insert(job.id(), Rc::clone(job));
    }

    /// Jobs whose render signal is waiting for a container to become ready.
    #[must_use]
    pub fn not_ready_jobs(&self) -> Vec<Rc<RuntimeJob>> {
        self.not_ready_jobs.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn stats(&self) -> RuntimeStats {
        self.stats.get()
    }

    /// Errors recorded while draining, oldest first.
    pub fn take_faults(&self) -> Vec<RippleError> {
        std::mem::take(&mut *self.faults.borrow_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use crate::job::{JobConfig, Trail};
    use crate::key::Key;
    use crate::observer::{Observer, ObserverCore, ingest_job};
    use crate::subscription::{Component, Subs, SubscribeConfig, SubscriptionTarget};
    use crate::Integration;
    use serde_json::{Value, json};
    use tracing_test::traced_test;

    /// Integer cell that commits its payload, optionally derived from a
    /// source through `derive`.
    struct Counter {
        core: ObserverCore,
        value: Cell<i64>,
        derive: RefCell<Option<Box<dyn Fn() -> i64>>>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Counter {
        fn new(hub: &Hub, key: &str, log: &Rc<RefCell<Vec<String>>>) -> Rc<Self> {
            let counter = Rc::new(Self {
                core: ObserverCore::new(hub, Some(Key::from(key))),
                value: Cell::new(0),
                derive: RefCell::new(None),
                log: Rc::clone(log),
            });
            counter.core.seed_value(json!(0));
            counter
        }

        fn set(self: &Rc<Self>, value: i64) {
            self.set_with(value, IngestConfig::default());
        }

        fn set_with(self: &Rc<Self>, value: i64, config: IngestConfig) {
            let observer: Rc<dyn Observer> = Rc::clone(self) as Rc<dyn Observer>;
            ingest_job(observer, Some(Box::new(value)), config).unwrap();
        }
    }

    impl Observer for Counter {
        fn core(&self) -> &ObserverCore {
            &self.core
        }

        fn ingest(self: Rc<Self>, config: IngestConfig) -> Result<()> {
            let next = match &*self.derive.borrow() {
                Some(derive) => derive(),
                None => return Ok(()),
            };
            if next == self.value.get() && !config.force {
                return Ok(());
            }
            ingest_job(self, Some(Box::new(next)), config)
        }

        fn perform(&self, job: &RuntimeJob) -> Result<()> {
            let next = job
                .take_payload::<i64>()
                .ok_or_else(|| RippleError::MissingPayload {
                    observer: self.core.label(),
                })?;
            let previous = self.value.replace(next);
            self.core.commit_values(json!(next), json!(previous));
            self.log
                .borrow_mut()
                .push(format!("{}={next}", self.core.label()));
            Ok(())
        }
    }

    fn as_dyn(counter: &Rc<Counter>) -> Rc<dyn Observer> {
        Rc::clone(counter) as Rc<dyn Observer>
    }

    type Calls = Rc<RefCell<Vec<Vec<(String, Value)>>>>;

    fn recording_hub(config: HubConfig) -> (Hub, Calls) {
        let hub = Hub::new(config.with_auto_integrate(false));
        let calls: Calls = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&calls);
        hub.integrate(Integration::new("test").with_update_method(move |_, data| {
            sink.borrow_mut()
                .push(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        }))
        .unwrap();
        (hub, calls)
    }

    fn subscribe_component(hub: &Hub, observers: &[Rc<dyn Observer>]) -> Component {
        let component = Component::new(());
        let subs = observers.iter().fold(Subs::new(), |subs, o| subs.with(o));
        hub.sub_controller()
            .subscribe(
                SubscriptionTarget::component(&component),
                subs,
                SubscribeConfig::default().with_wait_for_mount(false),
            )
            .unwrap();
        component
    }

    #[test]
    fn jobs_run_in_ingestion_order() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);

        a.set_with(1, IngestConfig::default().with_perform(false));
        b.set_with(2, IngestConfig::default().with_perform(false));
        assert_eq!(hub.runtime().queued(), 2);
        assert!(log.borrow().is_empty());

        a.set(3);
        assert_eq!(*log.borrow(), vec!["a=1", "b=2", "a=3"]);
        assert_eq!(hub.runtime().stats().jobs_performed, 3);
    }

    #[test]
    fn batch_dedup_merges_changed_data() {
        let (hub, calls) = recording_hub(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);
        subscribe_component(&hub, &[as_dyn(&a), as_dyn(&b)]);

        a.set(1);
        b.set(2);
        assert!(calls.borrow().is_empty());
        assert_eq!(hub.flush(), 1);

        assert_eq!(
            *calls.borrow(),
            vec![vec![("a".to_owned(), json!(1)), ("b".to_owned(), json!(2))]]
        );
        assert_eq!(hub.flush(), 0);
    }

    #[test]
    fn unbucketed_hub_flushes_after_each_drain() {
        let (hub, calls) = recording_hub(HubConfig::default().with_bucket(false));
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        subscribe_component(&hub, &[as_dyn(&a)]);

        a.set(1);
        a.set(2);
        assert_eq!(calls.borrow().len(), 2);
    }

    #[test]
    fn batch_holds_flush_until_closure_returns() {
        let (hub, calls) = recording_hub(HubConfig::default().with_bucket(false));
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);
        subscribe_component(&hub, &[as_dyn(&a), as_dyn(&b)]);

        hub.batch(|| {
            a.set(1);
            b.set(2);
            assert!(calls.borrow().is_empty());
        });
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(calls.borrow()[0].len(), 2);
    }

    #[test]
    fn scheduler_receives_one_task_per_batch() {
        let (hub, calls) = recording_hub(HubConfig::default());
        let tasks: Rc<RefCell<Vec<Box<dyn FnOnce()>>>> = Rc::new(RefCell::new(Vec::new()));
        let queue = Rc::clone(&tasks);
        hub.set_scheduler(move |task| queue.borrow_mut().push(task));

        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        subscribe_component(&hub, &[as_dyn(&a)]);

        a.set(1);
        a.set(2);
        assert_eq!(tasks.borrow().len(), 1);
        assert!(hub.runtime().is_flush_scheduled());

        let pending: Vec<_> = tasks.borrow_mut().drain(..).collect();
        for task in pending {
            task();
        }
        assert_eq!(*calls.borrow(), vec![vec![("a".to_owned(), json!(2))]]);
        assert!(!hub.runtime().is_flush_scheduled());
    }

    #[test]
    fn background_jobs_do_not_rerender() {
        let (hub, calls) = recording_hub(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        subscribe_component(&hub, &[as_dyn(&a)]);

        a.set_with(5, IngestConfig::default().with_background(true));
        assert_eq!(hub.flush(), 0);
        assert!(calls.borrow().is_empty());
        assert_eq!(a.value.get(), 5);
    }

    #[test]
    #[traced_test]
    fn retry_exhaustion_drops_render_signal() {
        let (hub, calls) = recording_hub(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let component = Component::new(());
        hub.sub_controller()
            .subscribe(
                SubscriptionTarget::component(&component),
                Subs::new().with(&as_dyn(&a)),
                SubscribeConfig::default(),
            )
            .unwrap();

        a.set(7);
        for _ in 0..3 {
            hub.flush();
            assert_eq!(hub.runtime().not_ready_jobs().len(), 1);
        }
        let job = hub.runtime().not_ready_jobs()[0].clone();
        assert_eq!(job.tries_to_update(), 3);

        hub.flush();
        assert!(hub.runtime().not_ready_jobs().is_empty());
        assert_eq!(job.tries_to_update(), 3);
        assert!(calls.borrow().is_empty());
        assert_eq!(a.value.get(), 7);
        assert_eq!(hub.runtime().stats().dropped_updates, 1);
        assert!(logs_contain("runtime.job_dropped"));
    }

    #[test]
    fn mount_delivers_waiting_render_signal() {
        let (hub, calls) = recording_hub(HubConfig::default().with_bucket(false));
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let component = Component::new(());
        hub.sub_controller()
            .subscribe(
                SubscriptionTarget::component(&component),
                Subs::new().with(&as_dyn(&a)),
                SubscribeConfig::default(),
            )
            .unwrap();

        a.set(1);
        assert!(calls.borrow().is_empty());
        assert!(hub.runtime().has_not_ready_jobs());

        hub.sub_controller().mount(&component);
        assert_eq!(*calls.borrow(), vec![vec![("a".to_owned(), json!(1))]]);
        assert!(!hub.runtime().has_not_ready_jobs());
    }

    #[test]
    fn dependents_propagate_transitively() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let source = Counter::new(&hub, "source", &log);
        let double = Counter::new(&hub, "double", &log);
        let quad = Counter::new(&hub, "quad", &log);

        let s = Rc::clone(&source);
        *double.derive.borrow_mut() = Some(Box::new(move || s.value.get() * 2));
        let d = Rc::clone(&double);
        *quad.derive.borrow_mut() = Some(Box::new(move || d.value.get() * 2));
        source.core.add_dependent(&as_dyn(&double));
        double.core.add_dependent(&as_dyn(&quad));

        source.set(3);
        assert_eq!(*log.borrow(), vec!["source=3", "double=6", "quad=12"]);
        assert!(hub.runtime().take_faults().is_empty());
    }

    #[test]
    #[traced_test]
    fn cycles_are_detected_and_reported() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);

        let from_a = Rc::clone(&a);
        *b.derive.borrow_mut() = Some(Box::new(move || from_a.value.get() + 1));
        let from_b = Rc::clone(&b);
        *a.derive.borrow_mut() = Some(Box::new(move || from_b.value.get() + 1));
        a.core.add_dependent(&as_dyn(&b));
        b.core.add_dependent(&as_dyn(&a));

        a.set(1);
        assert_eq!(*log.borrow(), vec!["a=1", "b=2"]);
        let faults = hub.runtime().take_faults();
        assert_eq!(faults.len(), 1);
        assert!(matches!(
            &faults[0],
            RippleError::DependencyCycle { path } if path == &["a", "b", "a"]
        ));
        assert_eq!(hub.runtime().stats().cycles_detected, 1);
        assert!(logs_contain("runtime.cycle"));
    }

    #[test]
    fn perform_failure_is_recorded() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let job = RuntimeJob::new(as_dyn(&a), JobConfig::default(), Trail::default());

        hub.runtime().ingest(job, true).unwrap();
        let faults = hub.runtime().take_faults();
        assert!(matches!(&faults[0], RippleError::MissingPayload { .. }));
        assert_eq!(hub.runtime().stats().jobs_performed, 0);
    }

    #[test]
    fn callback_containers_are_called_once_per_flush() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        hub.sub_controller()
            .subscribe(
                SubscriptionTarget::callback(move || counter.set(counter.get() + 1)),
                Subs::new().with(&as_dyn(&a)).with(&as_dyn(&b)),
                SubscribeConfig::default(),
            )
            .unwrap();

        a.set(1);
        b.set(1);
        a.set(2);
        hub.flush();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn mutation_from_side_effect_is_queued_not_nested() {
        let hub = Hub::new(HubConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let a = Counter::new(&hub, "a", &log);
        let b = Counter::new(&hub, "b", &log);

        // `b` follows `a` through a callback container that mutates on flush.
        let target = Rc::clone(&b);
        let source = Rc::clone(&a);
        hub.sub_controller()
            .subscribe(
                SubscriptionTarget::callback(move || target.set(source.value.get() * 10)),
                Subs::new().with(&as_dyn(&a)),
                SubscribeConfig::default(),
            )
            .unwrap();

        a.set(4);
        hub.flush();
        assert_eq!(b.value.get(), 40);
        assert_eq!(*log.borrow(), vec!["a=4", "b=40"]);
    }
}
