#![forbid(unsafe_code)]

//! Subscription containers: the binding between a set of observers and one
//! external consumer.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use serde_json::Value;

use crate::key::Key;
use crate::observer::{Observer, ObserverId};

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_COMPONENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    fn next() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Changed values handed to an integration, keyed by subscriber key.
pub type UpdatedData = IndexMap<String, Value>;

/// A UI component instance as seen by the core.
///
/// The instance is opaque; integrations downcast it to their framework's
/// component type. Clones share identity.
#[derive(Clone)]
pub struct Component {
    id: ComponentId,
    instance: Rc<dyn Any>,
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component").field("id", &self.id).finish()
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Component {}

impl Component {
    pub fn new<T: Any>(instance: T) -> Self {
        Self::from_rc(Rc::new(instance))
    }

    #[must_use]
    pub fn from_rc(instance: Rc<dyn Any>) -> Self {
        Self {
            id: ComponentId(NEXT_COMPONENT_ID.fetch_add(1, Ordering::Relaxed)),
            instance,
        }
    }

    #[must_use]
    pub fn id(&self) -> ComponentId {
        self.id
    }

    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.instance.downcast_ref::<T>()
    }

    #[must_use]
    pub fn instance(&self) -> &Rc<dyn Any> {
        &self.instance
    }
}

/// Narrows which part of an observer's value counts as a change for one
/// container.
#[derive(Clone)]
pub enum Selection {
    /// Object keys or array indices from the value root.
    Path(Vec<String>),
    /// Arbitrary projection of the value.
    Method(Rc<dyn Fn(&Value) -> Value>),
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Method(_) => f.write_str("Method(..)"),
        }
    }
}

impl Selection {
    pub fn path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Path(segments.into_iter().map(Into::into).collect())
    }

    pub fn method(f: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::Method(Rc::new(f))
    }

    /// Project `value` through this selection. A path that does not resolve
    /// selects `null`.
    #[must_use]
    pub fn select(&self, value: &Value) -> Value {
        match self {
            Self::Path(path) => {
                let mut current = value;
                for segment in path {
                    let next = match current {
                        Value::Object(map) => map.get(segment),
                        Value::Array(items) => {
                            segment.parse::<usize>().ok().and_then(|i| items.get(i))
                        }
                        _ => None,
                    };
                    match next {
                        Some(next) => current = next,
                        None => return Value::Null,
                    }
                }
                current.clone()
            }
            Self::Method(method) => method(value),
        }
    }
}

pub enum ContainerKind {
    Component(Component),
    Callback(Rc<dyn Fn()>),
}

impl fmt::Debug for ContainerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(component) => f.debug_tuple("Component").field(component).finish(),
            Self::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

pub struct SubscriptionContainer {
    id: ContainerId,
    key: Option<Key>,
    kind: ContainerKind,
    ready: Cell<bool>,
    subscribers: RefCell<IndexMap<ObserverId, Weak<dyn Observer>>>,
    subscriber_keys: RefCell<IndexMap<ObserverId, String>>,
    selections: RefCell<IndexMap<ObserverId, Vec<Selection>>>,
    updated_subscribers: RefCell<IndexMap<ObserverId, Rc<dyn Observer>>>,
}

impl fmt::Debug for SubscriptionContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionContainer")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("ready", &self.ready.get())
            .field("subscribers", &self.subscribers.borrow().len())
            .finish_non_exhaustive()
    }
}

impl SubscriptionContainer {
    #[must_use]
    pub fn new(kind: ContainerKind, key: Option<Key>, ready: bool) -> Self {
        Self {
            id: ContainerId::next(),
            key,
            kind,
            ready: Cell::new(ready),
            subscribers: RefCell::new(IndexMap::new()),
            subscriber_keys: RefCell::new(IndexMap::new()),
            selections: RefCell::new(IndexMap::new()),
            updated_subscribers: RefCell::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn id(&self) -> ContainerId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    #[must_use]
    pub fn kind(&self) -> &ContainerKind {
        &self.kind
    }

    #[must_use]
    pub fn component(&self) -> Option<&Component> {
        match &self.kind {
            ContainerKind::Component(component) => Some(component),
            ContainerKind::Callback(_) => None,
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.get()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.set(ready);
    }

    /// Attach `observer`, optionally under a subscriber key used for the
    /// props and updated data handed to the consumer.
    pub fn add_subscriber(&self, observer: &Rc<dyn Observer>, key: Option<String>) {
        let id = observer.core().id();
        self.subscribers
            .borrow_mut()
            .insert(id, Rc::downgrade(observer));
        if let Some(key) = key {
            self.subscriber_keys.borrow_mut().insert(id, key);
        }
    }

    pub fn remove_subscriber(&self, id: ObserverId) -> bool {
        self.subscriber_keys.borrow_mut().shift_remove(&id);
        self.selections.borrow_mut().shift_remove(&id);
        self.updated_subscribers.borrow_mut().shift_remove(&id);
        self.subscribers.borrow_mut().shift_remove(&id).is_some()
    }

    #[must_use]
    pub fn has_subscriber(&self, id: ObserverId) -> bool {
        self.subscribers.borrow().contains_key(&id)
    }

    #[must_use]
    pub fn subscribers(&self) -> Vec<Rc<dyn Observer>> {
        self.subscribers
            .borrow()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    #[must_use]
    pub fn subscriber_key(&self, id: ObserverId) -> Option<String> {
        self.subscriber_keys.borrow().get(&id).cloned()
    }

    pub fn add_selection(&self, id: ObserverId, selection: Selection) {
        self.selections
            .borrow_mut()
            .entry(id)
            .or_default()
            .push(selection);
    }

    #[must_use]
    pub fn has_selections(&self, id: ObserverId) -> bool {
        self.selections
            .borrow()
            .get(&id)
            .is_some_and(|s| !s.is_empty())
    }

    /// Whether a change of `observer` is relevant to this container.
    ///
    /// Without selections every change counts. With selections, at least one
    /// selected part must differ between the previous and current value.
    /// Both are read at flush time, so when several commits land before one
    /// flush only the last transition is compared.
    #[must_use]
    pub fn selection_changed(&self, observer: &dyn Observer) -> bool {
        let selections = self.selections.borrow();
        let Some(selections) = selections.get(&observer.core().id()) else {
            return true;
        };
        if selections.is_empty() {
            return true;
        }
        let value = observer.core().value().unwrap_or(Value::Null);
        let previous = observer.core().previous_value().unwrap_or(Value::Null);
        selections
            .iter()
            .any(|selection| selection.select(&value) != selection.select(&previous))
    }

    pub(crate) fn mark_updated(&self, observer: &Rc<dyn Observer>) {
        self.updated_subscribers
            .borrow_mut()
            .insert(observer.core().id(), Rc::clone(observer));
    }

    #[must_use]
    pub fn updated_count(&self) -> usize {
        self.updated_subscribers.borrow().len()
    }

    /// Drain the changed observers into a property bag.
    ///
    /// Each entry is keyed by the subscriber key, or by the observer's own
    /// key. Observers with neither are left out; an empty bag means a plain
    /// re-render.
    pub(crate) fn take_updated_data(&self) -> UpdatedData {
        let updated = std::mem::take(&mut *self.updated_subscribers.borrow_mut());
        let keys = self.subscriber_keys.borrow();
        let mut data = UpdatedData::new();
        for (id, observer) in updated {
            let key = keys
                .get(&id)
                .cloned()
                .or_else(|| observer.core().key().map(|k| k.to_string()));
            if let Some(key) = key {
                data.insert(key, observer.core().value().unwrap_or(Value::Null));
            }
        }
        data
    }

    /// Current values of every subscriber that has a key.
    #[must_use]
    pub fn props(&self) -> UpdatedData {
        let keys = self.subscriber_keys.borrow();
        self.subscribers
            .borrow()
            .iter()
            .filter_map(|(id, weak)| {
                let observer = weak.upgrade()?;
                let key = keys
                    .get(id)
                    .cloned()
                    .or_else(|| observer.core().key().map(|k| k.to_string()))?;
                Some((key, observer.core().value().unwrap_or(Value::Null)))
            })
            .collect()
    }
}
