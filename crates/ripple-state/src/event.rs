#![forbid(unsafe_code)]

//! Fire-and-forget events.
//!
//! An [`Event<P>`] holds no comparable value, so its observer's `perform`
//! commits nothing. With `rerender` on, every trigger ingests a forced job
//! so subscribed containers re-render.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, warn};

use ripple_core::{
    Hub, IngestConfig, Key, Observable, Observer, ObserverCore, Result, RippleError, RuntimeJob,
    ingest_job,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventConfig {
    pub key: Option<Key>,
    pub enabled: bool,
    /// Re-render subscribers on every trigger.
    pub rerender: bool,
    /// Disable the event after this many triggers.
    pub max_uses: Option<u32>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            key: None,
            enabled: true,
            rerender: false,
            max_uses: None,
        }
    }
}

impl EventConfig {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_rerender(mut self, rerender: bool) -> Self {
        self.rerender = rerender;
        self
    }

    #[must_use]
    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = Some(max_uses);
        self
    }
}

pub struct EventObserver {
    core: ObserverCore,
}

impl Observer for EventObserver {
    fn core(&self) -> &ObserverCore {
        &self.core
    }

    fn ingest(self: Rc<Self>, config: IngestConfig) -> Result<()> {
        ingest_job(self, None, config.with_force(true))
    }

    fn perform(&self, _job: &RuntimeJob) -> Result<()> {
        Ok(())
    }
}

type Callback<P> = Rc<dyn Fn(&P)>;

struct EventInner<P: 'static> {
    observer: Rc<EventObserver>,
    config: EventConfig,
    callbacks: RefCell<IndexMap<String, Callback<P>>>,
    enabled: Cell<bool>,
    uses: Cell<u32>,
    seq: Cell<u64>,
}

pub struct Event<P: 'static> {
    inner: Rc<EventInner<P>>,
}

impl<P: 'static> Clone for Event<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: 'static> fmt::Debug for Event<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("key", &self.inner.observer.core.key())
            .field("enabled", &self.inner.enabled.get())
            .field("uses", &self.inner.uses.get())
            .field("callbacks", &self.inner.callbacks.borrow().len())
            .finish()
    }
}

impl<P: 'static> Observable for Event<P> {
    fn observer(&self) -> Rc<dyn Observer> {
        Rc::clone(&self.inner.observer) as Rc<dyn Observer>
    }
}

impl<P: 'static> Event<P> {
    pub fn new(hub: &Hub, config: EventConfig) -> Self {
        let observer = Rc::new(EventObserver {
            core: ObserverCore::new(hub, config.key.clone()),
        });
        Self {
            inner: Rc::new(EventInner {
                observer,
                enabled: Cell::new(config.enabled),
                config,
                callbacks: RefCell::new(IndexMap::new()),
                uses: Cell::new(0),
                seq: Cell::new(0),
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.inner.observer.core.key()
    }

    /// Register `f`; returns its generated key.
    pub fn on(&self, f: impl Fn(&P) + 'static) -> String {
        let seq = self.inner.seq.get() + 1;
        self.inner.seq.set(seq);
        let key = format!("callback_{seq}");
        self.inner
            .callbacks
            .borrow_mut()
            .insert(key.clone(), Rc::new(f));
        key
    }

    pub fn on_with_key(&self, key: impl Into<String>, f: impl Fn(&P) + 'static) -> Result<()> {
        let key = key.into();
        let mut callbacks = self.inner.callbacks.borrow_mut();
        if callbacks.contains_key(&key) {
            warn!(callback = %key, "event.duplicate_callback");
            return Err(RippleError::duplicate_key("event callback", key));
        }
        callbacks.insert(key, Rc::new(f));
        Ok(())
    }

    pub fn remove_callback(&self, key: &str) -> bool {
        self.inner.callbacks.borrow_mut().shift_remove(key).is_some()
    }

    #[must_use]
    pub fn has_callback(&self, key: &str) -> bool {
        self.inner.callbacks.borrow().contains_key(key)
    }

    /// Call every callback with `payload`. Returns `false` when disabled.
    pub fn trigger(&self, payload: &P) -> bool {
        if !self.inner.enabled.get() {
            debug!(event = %self.inner.observer.core.label(), "event.disabled");
            return false;
        }
        let callbacks: Vec<Callback<P>> = self.inner.callbacks.borrow().values().cloned().collect();
        for callback in &callbacks {
            callback(payload);
        }
        let uses = self.inner.uses.get() + 1;
        self.inner.uses.set(uses);

        if self.inner.config.rerender {
            let observer = Rc::clone(&self.inner.observer);
            if let Err(err) = observer.ingest(IngestConfig::default()) {
                warn!(event = %self.inner.observer.core.label(), error = %err, "event.rerender_failed");
            }
        }
        if self.inner.config.max_uses.is_some_and(|max| uses >= max) {
            debug!(event = %self.inner.observer.core.label(), uses, "event.exhausted");
            self.disable();
        }
        true
    }

    pub fn enable(&self) {
        self.inner.enabled.set(true);
    }

    pub fn disable(&self) {
        self.inner.enabled.set(false);
    }

    /// Restore the configured enabled flag and zero the use count.
    pub fn reset(&self) {
        self.inner.enabled.set(self.inner.config.enabled);
        self.inner.uses.set(0);
    }

    #[must_use]
    pub fn uses(&self) -> u32 {
        self.inner.uses.get()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.get()
    }
}
