#![forbid(unsafe_code)]

//! Single-item views over a collection.
//!
//! A [`Selector<T>`] is a `State<Option<T>>` whose value source is one
//! collection item. The selector observer depends on the selected item's
//! observer, so item edits flow into it. Selecting a key that is not
//! collected yet leaves the selector a placeholder holding `None`; the
//! collection reselects it when the key arrives.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::debug;

use ripple_core::{Hub, IngestConfig, Key, Observable, Observer, Result};

use super::CollectionInner;
use crate::state::{State, StateConfig, StateObserver, StateValue, ValueSource};

struct SelectorSource<T: StateValue> {
    collection: Weak<CollectionInner<T>>,
    item_key: RefCell<Option<Key>>,
    /// The item observer this selector currently depends on.
    hooked: RefCell<Option<Weak<dyn Observer>>>,
    target: RefCell<Weak<StateObserver<Option<T>>>>,
}

impl<T: StateValue> SelectorSource<T> {
    fn item(&self) -> Option<State<T>> {
        let key = self.item_key.borrow().clone()?;
        self.collection.upgrade()?.item(&key)
    }

    fn unhook(&self) {
        let Some(target) = self.target.borrow().upgrade() else {
            return;
        };
        let target: Rc<dyn Observer> = target;
        if let Some(old) = self.hooked.borrow_mut().take().and_then(|w| w.upgrade()) {
            old.core().remove_dependent(target.core().id());
        }
    }

    fn hook(&self, item: &State<T>) {
        let Some(target) = self.target.borrow().upgrade() else {
            return;
        };
        let target: Rc<dyn Observer> = target;
        let observer = item.observer();
        observer.core().add_dependent(&target);
        *self.hooked.borrow_mut() = Some(Rc::downgrade(&observer));
    }

    fn is_hooked(&self) -> bool {
        self.hooked
            .borrow()
            .as_ref()
            .is_some_and(|w| w.strong_count() > 0)
    }
}

impl<T: StateValue> ValueSource<Option<T>> for SelectorSource<T> {
    fn compute(&self) -> Result<Option<T>> {
        Ok(self.item().map(|item| item.peek()))
    }
}

pub struct Selector<T: StateValue> {
    state: State<Option<T>>,
    source: Rc<SelectorSource<T>>,
}

impl<T: StateValue> Clone for Selector<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            source: Rc::clone(&self.source),
        }
    }
}

impl<T: StateValue + fmt::Debug> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("key", &self.key())
            .field("item_key", &self.item_key())
            .field("state", &self.state)
            .finish()
    }
}

impl<T: StateValue> Observable for Selector<T> {
    fn observer(&self) -> Rc<dyn Observer> {
        self.state.observer()
    }
}

impl<T: StateValue> Selector<T> {
    pub(crate) fn new(hub: &Hub, collection: Weak<CollectionInner<T>>, key: Key) -> Self {
        let state = State::with_config(hub, None, StateConfig::default().with_key(key).placeholder());
        let source = Rc::new(SelectorSource {
            collection,
            item_key: RefCell::new(None),
            hooked: RefCell::new(None),
            target: RefCell::new(state.downgrade()),
        });
        state
            .state_observer()
            .set_source(Rc::clone(&source) as Rc<dyn ValueSource<Option<T>>>);
        Self { state, source }
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.state.key()
    }

    #[must_use]
    pub fn item_key(&self) -> Option<Key> {
        self.source.item_key.borrow().clone()
    }

    /// Whether `key` is selected and resolved to a collected item.
    #[must_use]
    pub fn has_selected(&self, key: &Key) -> bool {
        self.source.item_key.borrow().as_ref() == Some(key) && self.source.is_hooked()
    }

    /// The selected item's value. Tracked.
    #[must_use]
    pub fn value(&self) -> Option<T> {
        self.state.value()
    }

    #[must_use]
    pub fn state(&self) -> &State<Option<T>> {
        &self.state
    }

    /// Point the selector at `key`.
    pub fn select(&self, key: impl Into<Key>, config: IngestConfig) -> Result<()> {
        let key = key.into();
        self.source.unhook();
        *self.source.item_key.borrow_mut() = Some(key.clone());
        match self.source.item() {
            Some(item) => {
                self.source.hook(&item);
                self.state.ingest(config)
            }
            None => {
                debug!(selector = ?self.key(), item = %key, "selector.item_missing");
                self.to_placeholder(config)
            }
        }
    }

    /// Resolve the current item key again, e.g. after it was collected or
    /// removed.
    pub fn reselect(&self) -> Result<()> {
        match self.item_key() {
            Some(key) => self.select(key, IngestConfig::default()),
            None => Ok(()),
        }
    }

    pub fn unselect(&self) -> Result<()> {
        self.source.unhook();
        *self.source.item_key.borrow_mut() = None;
        self.to_placeholder(IngestConfig::default())
    }

    fn to_placeholder(&self, config: IngestConfig) -> Result<()> {
        if self.state.is_placeholder() {
            return Ok(());
        }
        self.state.set_with(None, config)?;
        self.state.mark_placeholder();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::collection::{CollectConfig, Collection, CollectionConfig};
    use pretty_assertions::assert_eq;
    use ripple_core::{Hub, HubConfig, Key};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: String,
        name: String,
    }

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
        }
    }

    fn users() -> (Hub, Collection<User>) {
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let collection = Collection::new(&hub, CollectionConfig::default().with_key("users"));
        (hub, collection)
    }

    #[test]
    fn selector_follows_item_edits() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let current = users.select("current", "1").unwrap();
        assert_eq!(current.value(), Some(user("1", "frank")));
        assert!(current.has_selected(&Key::from("1")));

        users
            .update(&Key::from("1"), serde_json::json!({"name": "hans"}), Default::default())
            .unwrap();
        assert_eq!(current.value(), Some(user("1", "hans")));
    }

    #[test]
    fn selecting_a_missing_item_waits_as_placeholder() {
        let (_hub, users) = users();
        let current = users.select("current", "2").unwrap();
        assert_eq!(current.value(), None);
        assert!(current.state().is_placeholder());
        assert!(!current.has_selected(&Key::from("2")));

        users.collect([user("2", "jeff")], CollectConfig::default()).unwrap();
        assert_eq!(current.value(), Some(user("2", "jeff")));
        assert!(!current.state().is_placeholder());
        assert_eq!(current.state().initial_value(), Some(user("2", "jeff")));
    }

    #[test]
    fn removing_the_item_returns_to_placeholder() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let current = users.select("current", "1").unwrap();
        users.remove_items([Key::from("1")]).unwrap();
        assert_eq!(current.value(), None);
        assert!(current.state().is_placeholder());
    }

    #[test]
    fn unselect_clears() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let current = users.select("current", "1").unwrap();
        current.unselect().unwrap();
        assert_eq!(current.item_key(), None);
        assert_eq!(current.value(), None);
    }
}
