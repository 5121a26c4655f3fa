#![forbid(unsafe_code)]

//! Subscription bookkeeping for one hub.
//!
//! # Invariants
//!
//! 1. A container is registered with every observer it subscribes to, and
//!    with exactly one of the component or callback registries.
//! 2. A component container is ready iff its component is mounted or the
//!    subscription did not wait for mount.
//! 3. Unsubscribing twice is a no-op.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use ahash::AHashSet;
use indexmap::IndexMap;
use tracing::debug;

use super::container::{
    Component, ComponentId, ContainerId, ContainerKind, Selection, SubscriptionContainer,
    UpdatedData,
};
use crate::error::{Result, RippleError};
use crate::hub::WeakHub;
use crate::key::Key;
use crate::observer::{Observable, Observer};

/// Who receives the render signal.
#[derive(Clone)]
pub enum SubscriptionTarget {
    Component(Component),
    Callback(Rc<dyn Fn()>),
}

impl SubscriptionTarget {
    #[must_use]
    pub fn component(component: &Component) -> Self {
        Self::Component(component.clone())
    }

    pub fn callback(f: impl Fn() + 'static) -> Self {
        Self::Callback(Rc::new(f))
    }
}

impl fmt::Debug for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(component) => f.debug_tuple("Component").field(component).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// The observers a consumer depends on, each optionally under a key.
#[derive(Default)]
pub struct Subs {
    entries: Vec<(Option<String>, Rc<dyn Observer>)>,
}

impl Subs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dependency without a subscriber key. It still shows up in the
    /// props under its own observer key, if it has one.
    #[must_use]
    pub fn with(mut self, dep: &impl Observable) -> Self {
        self.entries.push((None, dep.observer()));
        self
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>, dep: &impl Observable) -> Self {
        self.entries.push((Some(key.into()), dep.observer()));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeConfig {
    pub key: Option<Key>,
    /// `None` uses the hub's `wait_for_mount`.
    pub wait_for_mount: Option<bool>,
    /// Selections per subscriber key.
    pub selectors: IndexMap<String, Vec<Selection>>,
}

impl SubscribeConfig {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_wait_for_mount(mut self, wait: bool) -> Self {
        self.wait_for_mount = Some(wait);
        self
    }

    #[must_use]
    pub fn with_selector(mut self, sub_key: impl Into<String>, selection: Selection) -> Self {
        self.selectors
            .entry(sub_key.into())
            .or_default()
            .push(selection);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Subscribed {
    pub container: Rc<SubscriptionContainer>,
    /// Current values of the keyed dependencies.
    pub props: UpdatedData,
}

pub struct SubController {
    hub: WeakHub,
    component_subs: RefCell<IndexMap<ContainerId, Rc<SubscriptionContainer>>>,
    callback_subs: RefCell<IndexMap<ContainerId, Rc<SubscriptionContainer>>>,
    mounted_components: RefCell<AHashSet<ComponentId>>,
}

impl fmt::Debug for SubController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubController")
            .field("component_subs", &self.component_subs.borrow().len())
            .field("callback_subs", &self.callback_subs.borrow().len())
            .field("mounted", &self.mounted_components.borrow().len())
            .finish()
    }
}

impl SubController {
    pub(crate) fn new(hub: WeakHub) -> Self {
        Self {
            hub,
            component_subs: RefCell::new(IndexMap::new()),
            callback_subs: RefCell::new(IndexMap::new()),
            mounted_components: RefCell::new(AHashSet::new()),
        }
    }

    /// Bind `subs` to `target`.
    pub fn subscribe(
        &self,
        target: SubscriptionTarget,
        subs: Subs,
        config: SubscribeConfig,
    ) -> Result<Subscribed> {
        let hub = self.hub.upgrade().ok_or(RippleError::dropped("hub"))?;
        let wait_for_mount = config
            .wait_for_mount
            .unwrap_or(hub.config().wait_for_mount);

        let (kind, ready) = match target {
            SubscriptionTarget::Component(component) => {
                let mounted = self
                    .mounted_components
                    .borrow()
                    .contains(&component.id());
                (
                    ContainerKind::Component(component),
                    !wait_for_mount || mounted,
                )
            }
            SubscriptionTarget::Callback(callback) => (ContainerKind::Callback(callback), true),
        };
        let is_component = matches!(kind, ContainerKind::Component(_));
        let container = Rc::new(SubscriptionContainer::new(kind, config.key, ready));

        for (sub_key, observer) in subs.entries {
            container.add_subscriber(&observer, sub_key.clone());
            if let Some(selections) = sub_key.as_ref().and_then(|k| config.selectors.get(k)) {
                for selection in selections {
                    container.add_selection(observer.core().id(), selection.clone());
                }
            }
            observer.core().subscribe(Rc::clone(&container));
        }

        let registry = if is_component {
            &self.component_subs
        } else {
            &self.callback_subs
        };
        registry
            .borrow_mut()
            .insert(container.id(), Rc::clone(&container));

        debug!(
            container = container.id().get(),
            component = is_component,
            ready,
            subscribers = container.subscribers().len(),
            "sub_controller.subscribe"
        );

        let props = container.props();
        Ok(Subscribed { container, props })
    }

    /// Detach `container` from its observers and forget it.
    ///
    /// Returns `false` when it was already unsubscribed.
    pub fn unsubscribe(&self, container: &SubscriptionContainer) -> bool {
        let id = container.id();
        let removed = self.component_subs.borrow_mut().shift_remove(&id).is_some()
            | self.callback_subs.borrow_mut().shift_remove(&id).is_some();
        for observer in container.subscribers() {
            observer.core().unsubscribe(id);
            container.remove_subscriber(observer.core().id());
        }
        if removed {
            debug!(container = id.get(), "sub_controller.unsubscribe");
        }
        removed
    }

    /// Unsubscribe every container bound to `component`.
    pub fn unsubscribe_component(&self, component: &Component) -> usize {
        let containers: Vec<_> = self
            .component_subs
            .borrow()
            .values()
            .filter(|c| c.component() == Some(component))
            .cloned()
            .collect();
        containers.iter().filter(|c| self.unsubscribe(c)).count()
    }

    /// Mark `component` mounted and its containers ready.
    ///
    /// Render signals that were waiting on a not-ready container get another
    /// flush request.
    pub fn mount(&self, component: &Component) {
        self.mounted_components.borrow_mut().insert(component.id());
        for container in self.containers_of(component) {
            container.set_ready(true);
        }
        debug!(component = component.id().get(), "sub_controller.mount");
        if let Some(hub) = self.hub.upgrade()
            && hub.runtime().has_not_ready_jobs()
        {
            hub.runtime().request_flush();
        }
    }

    pub fn unmount(&self, component: &Component) {
        self.mounted_components.borrow_mut().remove(&component.id());
        for container in self.containers_of(component) {
            container.set_ready(false);
        }
        debug!(component = component.id().get(), "sub_controller.unmount");
    }

    #[must_use]
    pub fn is_mounted(&self, component: &Component) -> bool {
        self.mounted_components.borrow().contains(&component.id())
    }

    #[must_use]
    pub fn component_subscription_count(&self) -> usize {
        self.component_subs.borrow().len()
    }

    #[must_use]
    pub fn callback_subscription_count(&self) -> usize {
        self.callback_subs.borrow().len()
    }

    fn containers_of(&self, component: &Component) -> Vec<Rc<SubscriptionContainer>> {
        self.component_subs
            .borrow()
            .values()
            .filter(|c| c.component() == Some(component))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use crate::observer::ObserverCore;
    use serde_json::json;

    struct Node {
        core: ObserverCore,
    }

    impl Observer for Node {
        fn core(&self) -> &ObserverCore {
            &self.core
        }
    }

    fn node(hub: &Hub, key: Option<&str>, value: serde_json::Value) -> Rc<dyn Observer> {
        let node = Rc::new(Node {
            core: ObserverCore::new(hub, key.map(Key::from)),
        });
        node.core.seed_value(value);
        node
    }

    #[test]
    fn component_waits_for_mount() {
        let hub = Hub::new(HubConfig::default());
        let component = Component::new(());
        let a = node(&hub, Some("a"), json!(1));

        let subscribed = hub
            .sub_controller()
            .subscribe(
                SubscriptionTarget::component(&component),
                Subs::new().with(&a),
                SubscribeConfig::default(),
            )
            .unwrap();
        assert!(!subscribed.container.is_ready());
        assert!(a.core().is_subscribed());

        hub.sub_controller().mount(&component);
        assert!(subscribed.container.is_ready());

        hub.sub_controller().unmount(&component);
        assert!(!subscribed.container.is_ready());
    }

    #[test]
    fn already_mounted_component_is_ready() {
        let hub = Hub::new(HubConfig::default());
        let component = Component::new(());
        hub.sub_controller().mount(&component);
        let a = node(&hub, None, json!(1));
        let subscribed = hub
            .sub_controller()
            .subscribe(
                SubscriptionTarget::component(&component),
                Subs::new().with(&a),
                SubscribeConfig::default(),
            )
            .unwrap();
        assert!(subscribed.container.is_ready());
    }

    #[test]
    fn callbacks_are_ready_immediately() {
        let hub = Hub::new(HubConfig::default());
        let a = node(&hub, None, json!(1));
        let subscribed = hub
            .sub_controller()
            .subscribe(
                SubscriptionTarget::callback(|| {}),
                Subs::new().with(&a),
                SubscribeConfig::default(),
            )
            .unwrap();
        assert!(subscribed.container.is_ready());
        assert_eq!(hub.sub_controller().callback_subscription_count(), 1);
    }

    #[test]
    fn props_use_subscriber_then_observer_keys() {
        let hub = Hub::new(HubConfig::default());
        let a = node(&hub, Some("a"), json!(1));
        let b = node(&hub, None, json!(2));
        let c = node(&hub, None, json!(3));
        let subscribed = hub
            .sub_controller()
            .subscribe(
                SubscriptionTarget::callback(|| {}),
                Subs::new().with(&a).with_key("bee", &b).with(&c),
                SubscribeConfig::default(),
            )
            .unwrap();

        let props: Vec<_> = subscribed.props.into_iter().collect();
        assert_eq!(
            props,
            vec![("a".to_owned(), json!(1)), ("bee".to_owned(), json!(2))]
        );
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let hub = Hub::new(HubConfig::default());
        let a = node(&hub, None, json!(1));
        let subscribed = hub
            .sub_controller()
            .subscribe(
                SubscriptionTarget::callback(|| {}),
                Subs::new().with(&a),
                SubscribeConfig::default(),
            )
            .unwrap();

        assert!(hub.sub_controller().unsubscribe(&subscribed.container));
        assert!(!a.core().is_subscribed());
        assert!(!hub.sub_controller().unsubscribe(&subscribed.container));
        assert_eq!(hub.sub_controller().callback_subscription_count(), 0);
    }

    #[test]
    fn unsubscribe_component_removes_all_its_containers() {
        let hub = Hub::new(HubConfig::default());
        let component = Component::new(());
        let a = node(&hub, None, json!(1));
        for _ in 0..2 {
            hub.sub_controller()
                .subscribe(
                    SubscriptionTarget::component(&component),
                    Subs::new().with(&a),
                    SubscribeConfig::default(),
                )
                .unwrap();
        }
        assert_eq!(hub.sub_controller().unsubscribe_component(&component), 2);
        assert_eq!(hub.sub_controller().unsubscribe_component(&component), 0);
    }
}
