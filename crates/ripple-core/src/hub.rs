#![forbid(unsafe_code)]

//! The top-level instance.
//!
//! A [`Hub`] owns one runtime, one subscription controller, one integration
//! registry, one storage registry and one dependency tracker. Every
//! primitive is created against a hub and keeps a [`WeakHub`] to it, so
//! dropping the last `Hub` handle tears the whole graph down.

use std::fmt;
use std::rc::{Rc, Weak};

use ripple_storage::{RegisterConfig, Storage, Storages};
use tracing::{info, warn};

use crate::config::HubConfig;
use crate::error::Result;
use crate::integration::{Integration, Integrations};
use crate::key::Key;
use crate::runtime::Runtime;
use crate::subscription::{SubController, SubscribeConfig, Subscribed, Subs, SubscriptionTarget};
use crate::tracker::ComputedTracker;

struct HubInner {
    config: HubConfig,
    runtime: Runtime,
    sub_controller: SubController,
    integrations: Integrations,
    storages: Storages,
    tracker: ComputedTracker,
}

/// Cheap, clonable handle to a hub.
#[derive(Clone)]
pub struct Hub {
    inner: Rc<HubInner>,
}

/// Non-owning handle held by everything the hub owns.
#[derive(Clone, Default)]
pub struct WeakHub {
    inner: Weak<HubInner>,
}

impl WeakHub {
    #[must_use]
    pub fn upgrade(&self) -> Option<Hub> {
        self.inner.upgrade().map(|inner| Hub { inner })
    }
}

impl fmt::Debug for WeakHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHub")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("runtime", &self.inner.runtime)
            .field("integrations", &self.inner.integrations)
            .finish_non_exhaustive()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

impl Hub {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let auto_integrate = config.auto_integrate;
        let inner = Rc::new_cyclic(|weak: &Weak<HubInner>| {
            let hub = WeakHub {
                inner: weak.clone(),
            };
            HubInner {
                config,
                runtime: Runtime::new(hub.clone()),
                sub_controller: SubController::new(hub.clone()),
                integrations: Integrations::new(hub),
                storages: Storages::new(),
                tracker: ComputedTracker::new(),
            }
        });
        let hub = Self { inner };

        if auto_integrate {
            for integration in Integrations::initial_integrations() {
                if let Err(err) = hub.integrations().integrate(integration) {
                    warn!(error = %err, "hub.auto_integrate_failed");
                }
            }
        }
        info!(
            key = ?hub.inner.config.key,
            bucket = hub.inner.config.bucket,
            integrations = hub.integrations().len(),
            "hub.created"
        );
        hub
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakHub {
        WeakHub {
            inner: Rc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Hub) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.inner.config.key.as_ref()
    }

    #[must_use]
    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    #[must_use]
    pub fn sub_controller(&self) -> &SubController {
        &self.inner.sub_controller
    }

    #[must_use]
    pub fn integrations(&self) -> &Integrations {
        &self.inner.integrations
    }

    #[must_use]
    pub fn storages(&self) -> &Storages {
        &self.inner.storages
    }

    #[must_use]
    pub fn tracker(&self) -> &ComputedTracker {
        &self.inner.tracker
    }

    pub fn integrate(&self, integration: Integration) -> Result<()> {
        self.integrations().integrate(Rc::new(integration))
    }

    #[must_use]
    pub fn has_integration(&self) -> bool {
        self.integrations().has_integration()
    }

    pub fn register_storage(&self, storage: Storage, config: RegisterConfig) -> Result<()> {
        Ok(self.storages().register(storage, config)?)
    }

    pub fn subscribe(
        &self,
        target: SubscriptionTarget,
        subs: Subs,
        config: SubscribeConfig,
    ) -> Result<Subscribed> {
        self.sub_controller().subscribe(target, subs, config)
    }

    /// Drain queued jobs and notify every touched subscriber now.
    ///
    /// This is the tick boundary for a bucketed hub without a scheduler.
    pub fn flush(&self) -> usize {
        self.runtime().flush()
    }

    /// Run `f` with flushing held back, then flush once.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime().batch(f)
    }

    /// Hand deferred flushes to the host's event loop.
    pub fn set_scheduler(&self, scheduler: impl Fn(Box<dyn FnOnce()>) + 'static) {
        self.runtime().set_scheduler(Rc::new(scheduler));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_storage::MemoryStorage;
    use serde_json::json;

    #[test]
    fn weak_handle_tracks_lifetime() {
        let hub = Hub::new(HubConfig::default());
        let weak = hub.downgrade();
        assert!(weak.upgrade().is_some_and(|h| h.ptr_eq(&hub)));
        drop(hub);
        assert!(weak.upgrade().is_none());
        assert!(WeakHub::default().upgrade().is_none());
    }

    #[test]
    fn register_storage_makes_default() {
        let hub = Hub::new(HubConfig::default());
        let backend = MemoryStorage::new();
        hub.register_storage(
            Storage::new("memory", backend.clone()).unwrap(),
            RegisterConfig::default(),
        )
        .unwrap();
        assert_eq!(
            hub.storages().default_storage_key().as_deref(),
            Some("memory")
        );
        hub.storages().set("k", &json!(true), &[]).unwrap();
        assert_eq!(backend.raw("k").as_deref(), Some("true"));
    }

    #[test]
    fn config_is_exposed() {
        let hub = Hub::new(HubConfig::default().with_key("app").with_bucket(false));
        assert_eq!(hub.key(), Some(&Key::from("app")));
        assert!(!hub.config().bucket);
    }
}
