#![forbid(unsafe_code)]

//! UI framework adapters.
//!
//! An [`Integration`] describes how to reach one UI framework: an optional
//! one-time `bind` check and the `update_method` that actually re-renders a
//! component. [`Integrations`] is the per-hub registry the runtime calls
//! once per touched component container.
//!
//! # Failure Modes
//!
//! - **Missing key**: `integrate` refuses the integration with
//!   [`RippleError::MissingKey`] and registers nothing.
//! - **Bind returns false**: the integration is registered but not ready;
//!   `update` skips it and logs `integrations.skipped`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{Result, RippleError};
use crate::hub::{Hub, WeakHub};
use crate::subscription::{Component, UpdatedData};

pub type BindFn = Rc<dyn Fn(&Hub) -> bool>;
pub type UpdateFn = Rc<dyn Fn(&Component, &UpdatedData)>;

pub struct Integration {
    key: String,
    bind: Option<BindFn>,
    update_method: Option<UpdateFn>,
    ready: Cell<bool>,
    integrated: Cell<bool>,
}

impl fmt::Debug for Integration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integration")
            .field("key", &self.key)
            .field("ready", &self.ready.get())
            .field("integrated", &self.integrated.get())
            .finish_non_exhaustive()
    }
}

impl Integration {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            bind: None,
            update_method: None,
            ready: Cell::new(false),
            integrated: Cell::new(false),
        }
    }

    #[must_use]
    pub fn with_bind(mut self, bind: impl Fn(&Hub) -> bool + 'static) -> Self {
        self.bind = Some(Rc::new(bind));
        self
    }

    #[must_use]
    pub fn with_update_method(
        mut self,
        update: impl Fn(&Component, &UpdatedData) + 'static,
    ) -> Self {
        self.update_method = Some(Rc::new(update));
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    #[must_use]
    pub fn is_integrated(&self) -> bool {
        self.integrated.get()
    }
}

thread_local! {
    static INITIAL_INTEGRATIONS: RefCell<Vec<Rc<Integration>>> = const { RefCell::new(Vec::new()) };
}

pub struct Integrations {
    hub: WeakHub,
    integrations: RefCell<IndexMap<String, Rc<Integration>>>,
}

impl fmt::Debug for Integrations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Integrations")
            .field(
                "keys",
                &self.integrations.borrow().keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Integrations {
    pub(crate) fn new(hub: WeakHub) -> Self {
        Self {
            hub,
            integrations: RefCell::new(IndexMap::new()),
        }
    }

    /// Queue `integration` for every hub created afterwards on this thread
    /// with `auto_integrate` on.
    pub fn add_initial_integration(integration: Integration) {
        let integration = Rc::new(integration);
        INITIAL_INTEGRATIONS.with(|list| list.borrow_mut().push(integration));
    }

    #[must_use]
    pub fn initial_integrations() -> Vec<Rc<Integration>> {
        INITIAL_INTEGRATIONS.with(|list| list.borrow().clone())
    }

    pub fn clear_initial_integrations() {
        INITIAL_INTEGRATIONS.with(|list| list.borrow_mut().clear());
    }

    /// Register `integration` and run its bind check.
    pub fn integrate(&self, integration: Rc<Integration>) -> Result<()> {
        if integration.key.is_empty() {
            warn!("integrations.missing_key");
            return Err(RippleError::missing_key("integration"));
        }
        if self.integrations.borrow().contains_key(&integration.key) {
            warn!(integration = %integration.key, "integrations.duplicate");
            return Err(RippleError::duplicate_key("integration", &integration.key));
        }
        let hub = self.hub.upgrade().ok_or(RippleError::dropped("hub"))?;

        let ready = integration.bind.as_ref().is_none_or(|bind| bind(&hub));
        integration.ready.set(ready);
        integration.integrated.set(true);
        self.integrations
            .borrow_mut()
            .insert(integration.key.clone(), Rc::clone(&integration));

        info!(integration = %integration.key, ready, "integrations.integrated");
        Ok(())
    }

    /// Re-render `component` through every ready integration.
    ///
    /// Returns how many integrations were called.
    pub fn update(&self, component: &Component, updated: &UpdatedData) -> usize {
        let integrations: Vec<_> = self.integrations.borrow().values().cloned().collect();
        let mut called = 0;
        for integration in integrations {
            if !integration.is_ready() {
                debug!(integration = %integration.key, "integrations.skipped");
                continue;
            }
            if let Some(update) = &integration.update_method {
                update(component, updated);
                called += 1;
            }
        }
        called
    }

    #[must_use]
    pub fn has_integration(&self) -> bool {
        !self.integrations.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Rc<Integration>> {
        self.integrations.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.integrations.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.integrations.borrow().is_empty()
    }
}
