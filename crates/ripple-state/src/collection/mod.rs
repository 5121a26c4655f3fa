#![forbid(unsafe_code)]

//! Keyed item sets with groups and selectors.
//!
//! # Design
//!
//! A [`Collection<T>`] owns one [`State<T>`] per item, keyed by the item's
//! primary-key field. Groups and selectors are views: they hold weak
//! references back to the collection and reach items through the
//! dependency graph. Structural changes (items collected or removed) are
//! pushed to the affected views explicitly, since no observer of theirs
//! changed.
//!
//! Every item is in the default group. Removing an item from its last group
//! removes it from the collection.
//!
//! # Failure Modes
//!
//! - **No primary key** on any item passed to `collect`: nothing is
//!   collected and `MissingPrimaryKey` is returned.
//! - **Unknown item, group or selector**: the matching not-found error;
//!   the collection is untouched.

pub mod group;
pub mod persistent;
pub mod selector;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, warn};

use ripple_core::{Hub, IngestConfig, Key, Result, RippleError, WeakHub};

use crate::json;
use crate::state::{State, StateConfig, StateValue};

pub use group::{AddMethod, Group, GroupAddConfig, GroupObserver};
pub use persistent::{CollectionPersistent, group_storage_key, item_storage_key};
pub use selector::Selector;

pub const DEFAULT_PRIMARY_KEY: &str = "id";
pub const DEFAULT_GROUP_KEY: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionConfig {
    pub key: Option<Key>,
    /// Field of each item holding its key.
    pub primary_key: String,
    pub default_group_key: Key,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            key: None,
            primary_key: DEFAULT_PRIMARY_KEY.to_owned(),
            default_group_key: Key::from(DEFAULT_GROUP_KEY),
        }
    }
}

impl CollectionConfig {
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    #[must_use]
    pub fn with_default_group_key(mut self, key: impl Into<Key>) -> Self {
        self.default_group_key = key.into();
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectConfig {
    /// Groups to add the items to, besides the default group.
    pub groups: Vec<Key>,
    pub method: AddMethod,
    /// Replace existing items, initial value included, instead of updating.
    pub overwrite: bool,
    pub background: bool,
}

impl CollectConfig {
    #[must_use]
    pub fn with_groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: AddMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateConfig {
    /// Merge into the item instead of replacing it.
    pub patch: bool,
    pub add_new_properties: bool,
    pub background: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            patch: true,
            add_new_properties: true,
            background: false,
        }
    }
}

impl UpdateConfig {
    #[must_use]
    pub fn with_patch(mut self, patch: bool) -> Self {
        self.patch = patch;
        self
    }

    #[must_use]
    pub fn with_add_new_properties(mut self, add: bool) -> Self {
        self.add_new_properties = add;
        self
    }

    #[must_use]
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }
}

pub(crate) struct CollectionInner<T: StateValue> {
    hub: WeakHub,
    key: RefCell<Option<Key>>,
    primary_key: String,
    default_group_key: Key,
    default_group: Group<T>,
    items: RefCell<IndexMap<Key, State<T>>>,
    groups: RefCell<IndexMap<Key, Group<T>>>,
    selectors: RefCell<IndexMap<Key, Selector<T>>>,
    persistent: RefCell<Option<Rc<CollectionPersistent>>>,
}

impl<T: StateValue> CollectionInner<T> {
    pub(crate) fn item(&self, key: &Key) -> Option<State<T>> {
        self.items.borrow().get(key).cloned()
    }

    pub(crate) fn items_snapshot(&self, keys: &[Key]) -> Vec<Option<State<T>>> {
        let items = self.items.borrow();
        keys.iter().map(|key| items.get(key).cloned()).collect()
    }

    fn label(&self) -> String {
        self.key
            .borrow()
            .as_ref()
            .map_or_else(|| "<unkeyed>".to_owned(), ToString::to_string)
    }
}

/// A keyed set of items.
pub struct Collection<T: StateValue> {
    inner: Rc<CollectionInner<T>>,
}

impl<T: StateValue> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: StateValue> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("key", &self.inner.key.borrow())
            .field("items", &self.inner.items.borrow().len())
            .field("groups", &self.inner.groups.borrow().keys().collect::<Vec<_>>())
            .field("selectors", &self.inner.selectors.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: StateValue> Collection<T> {
    pub fn new(hub: &Hub, config: CollectionConfig) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<CollectionInner<T>>| {
            let default_group = Group::new(
                hub,
                weak.clone(),
                config.default_group_key.clone(),
                Vec::new(),
            );
            let mut groups = IndexMap::new();
            groups.insert(config.default_group_key.clone(), default_group.clone());
            CollectionInner {
                hub: hub.downgrade(),
                key: RefCell::new(config.key),
                primary_key: config.primary_key,
                default_group_key: config.default_group_key,
                default_group,
                items: RefCell::new(IndexMap::new()),
                groups: RefCell::new(groups),
                selectors: RefCell::new(IndexMap::new()),
                persistent: RefCell::new(None),
            }
        });
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<CollectionInner<T>> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn from_inner(inner: Rc<CollectionInner<T>>) -> Self {
        Self { inner }
    }

    fn hub(&self) -> Result<Hub> {
        self.inner.hub.upgrade().ok_or(RippleError::dropped("hub"))
    }

    #[must_use]
    pub fn key(&self) -> Option<Key> {
        self.inner.key.borrow().clone()
    }

    #[must_use]
    pub fn primary_key(&self) -> &str {
        &self.inner.primary_key
    }

    fn item_key_of(&self, item: &T) -> Result<Key> {
        let value = serde_json::to_value(item)?;
        value
            .get(&self.inner.primary_key)
            .and_then(Key::from_value)
            .ok_or_else(|| RippleError::MissingPrimaryKey {
                primary_key: self.inner.primary_key.clone(),
            })
    }

    fn item_not_found(&self, key: &Key) -> RippleError {
        warn!(collection = %self.inner.label(), item = %key, "collection.item_not_found");
        RippleError::ItemNotFound {
            collection: self.inner.label(),
            item: key.clone(),
        }
    }

    fn duplicate_item(&self, key: &Key) -> RippleError {
        warn!(collection = %self.inner.label(), item = %key, "collection.duplicate_item");
        RippleError::duplicate_key("item", key)
    }

    fn group_not_found(&self, key: &Key) -> RippleError {
        warn!(collection = %self.inner.label(), group = %key, "collection.group_not_found");
        RippleError::GroupNotFound {
            collection: self.inner.label(),
            group: key.clone(),
        }
    }

    // ─── Items ───────────────────────────────────────────────────────────

    /// Add or update `items`, keyed by their primary-key field.
    pub fn collect<I>(&self, items: I, config: CollectConfig) -> Result<()>
    where
        I: IntoIterator<Item = T>,
    {
        let mut keyed = Vec::new();
        for item in items {
            match self.item_key_of(&item) {
                Ok(key) => keyed.push((key, item)),
                Err(err) => {
                    warn!(collection = %self.inner.label(), error = %err, "collection.collect_rejected");
                    return Err(err);
                }
            }
        }
        if keyed.is_empty() {
            return Ok(());
        }
        let hub = self.hub()?;
        hub.batch(|| self.collect_keyed(&hub, keyed, &config))
    }

    fn collect_keyed(&self, hub: &Hub, keyed: Vec<(Key, T)>, config: &CollectConfig) -> Result<()> {
        let ingest = IngestConfig::default().with_background(config.background);
        let mut keys = Vec::with_capacity(keyed.len());
        for (key, item) in keyed {
            match self.inner.item(&key) {
                Some(existing) => {
                    existing.set_with(item, ingest.clone().with_overwrite(config.overwrite))?;
                }
                None => {
                    let state = State::with_config(hub, item, StateConfig::default().with_key(key.clone()));
                    self.inner.items.borrow_mut().insert(key.clone(), state);
                }
            }
            keys.push(key);
        }

        let add = GroupAddConfig::default()
            .with_method(config.method)
            .with_background(config.background);
        let mut targets = vec![self.inner.default_group_key.clone()];
        targets.extend(config.groups.iter().cloned());
        for group_key in targets {
            self.group_or_create(hub, group_key).add(keys.clone(), add)?;
        }

        self.refresh_views(&keys)?;
        debug!(collection = %self.inner.label(), items = keys.len(), "collection.collected");
        Ok(())
    }

    /// Rebuild groups still missing one of `keys` and resolve waiting
    /// selectors.
    fn refresh_views(&self, keys: &[Key]) -> Result<()> {
        let groups: Vec<Group<T>> = self.inner.groups.borrow().values().cloned().collect();
        for group in groups {
            if group.not_found_item_keys().iter().any(|k| keys.contains(k)) {
                group.rebuild()?;
            }
        }
        let selectors: Vec<Selector<T>> = self.inner.selectors.borrow().values().cloned().collect();
        for selector in selectors {
            if let Some(item_key) = selector.item_key()
                && keys.contains(&item_key)
                && !selector.has_selected(&item_key)
            {
                selector.reselect()?;
            }
        }
        Ok(())
    }

    /// Merge `changes` into the item at `key`, or replace it without
    /// `patch`. Changing the primary-key field re-keys the item.
    pub fn update(&self, key: &Key, changes: Value, config: UpdateConfig) -> Result<State<T>> {
        let Some(item) = self.inner.item(key) else {
            return Err(self.item_not_found(key));
        };
        let changes = json::expect_object(changes)?;
        let mut next = if config.patch {
            let mut current = json::expect_object(serde_json::to_value(item.next_value())?)?;
            json::merge(&mut current, changes, config.add_new_properties);
            current
        } else {
            changes
        };
        let new_key = next.get(&self.inner.primary_key).and_then(Key::from_value);
        match &new_key {
            None => {
                next.insert(self.inner.primary_key.clone(), key.to_value());
            }
            Some(new_key) if new_key != key && self.has(new_key) => {
                return Err(self.duplicate_item(new_key));
            }
            Some(_) => {}
        }
        let value: T = serde_json::from_value(Value::Object(next))?;
        item.set_with(value, IngestConfig::default().with_background(config.background))?;

        if let Some(new_key) = new_key
            && new_key != *key
        {
            self.update_item_key(key, new_key)?;
        }
        Ok(item)
    }

    /// Move the item at `old` to `new` across items, groups, selectors and
    /// storage.
    pub fn update_item_key(&self, old: &Key, new: impl Into<Key>) -> Result<()> {
        let new = new.into();
        if *old == new {
            return Ok(());
        }
        let Some(item) = self.inner.item(old) else {
            return Err(self.item_not_found(old));
        };
        if self.has(&new) {
            return Err(self.duplicate_item(&new));
        }

        let mut value = json::expect_object(serde_json::to_value(item.next_value())?)?;
        value.insert(self.inner.primary_key.clone(), new.to_value());
        item.set(serde_json::from_value(Value::Object(value))?)?;

        {
            let mut items = self.inner.items.borrow_mut();
            if let Some(state) = items.shift_remove(old) {
                items.insert(new.clone(), state);
            }
        }
        item.set_key(new.clone())?;
        let collection_persistent = self.inner.persistent.borrow().clone();
        if let (Some(persistent), Some(collection)) = (item.persistent(), collection_persistent) {
            persistent.rekey(
                &item_storage_key(&collection.key(), &new),
                &serde_json::to_value(item.peek())?,
            )?;
        }

        let groups: Vec<Group<T>> = self.inner.groups.borrow().values().cloned().collect();
        for group in groups {
            group.replace(old, new.clone())?;
        }
        let selectors: Vec<Selector<T>> = self.inner.selectors.borrow().values().cloned().collect();
        for selector in selectors {
            if selector.item_key().as_ref() == Some(old) {
                selector.select(new.clone(), IngestConfig::default())?;
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn has(&self, key: &Key) -> bool {
        self.inner.items.borrow().contains_key(key)
    }

    #[must_use]
    pub fn get_item(&self, key: &Key) -> Option<State<T>> {
        self.inner.item(key)
    }

    #[must_use]
    pub fn get_item_value(&self, key: &Key) -> Option<T> {
        self.inner.item(key).map(|item| item.value())
    }

    #[must_use]
    pub fn get_all_items(&self) -> Vec<State<T>> {
        self.inner.items.borrow().values().cloned().collect()
    }

    #[must_use]
    pub fn get_all_item_values(&self) -> Vec<T> {
        self.get_all_items().iter().map(State::value).collect()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.items.borrow().len()
    }

    /// Remove items everywhere. Unknown keys are skipped; returns how many
    /// were removed.
    pub fn remove_items<I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        let keys: Vec<Key> = keys
            .into_iter()
            .map(Into::into)
            .filter(|key| self.has(key))
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }
        let hub = self.hub()?;
        hub.batch(|| self.remove_keyed(&keys))?;
        debug!(collection = %self.inner.label(), items = keys.len(), "collection.removed");
        Ok(keys.len())
    }

    fn remove_keyed(&self, keys: &[Key]) -> Result<()> {
        let groups: Vec<Group<T>> = self.inner.groups.borrow().values().cloned().collect();
        for group in &groups {
            group.remove(keys.iter().cloned())?;
        }
        let removed: Vec<State<T>> = {
            let mut items = self.inner.items.borrow_mut();
            keys.iter().filter_map(|key| items.shift_remove(key)).collect()
        };
        for item in &removed {
            item.unpersist(true)?;
        }
        let selectors: Vec<Selector<T>> = self.inner.selectors.borrow().values().cloned().collect();
        for selector in selectors {
            if selector.item_key().is_some_and(|k| keys.contains(&k)) {
                selector.reselect()?;
            }
        }
        Ok(())
    }

    /// Take items out of the given groups. Items left in no group are
    /// removed from the collection.
    pub fn remove_from_groups<I, G>(&self, keys: I, groups: G) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
        G: IntoIterator,
        G::Item: Into<Key>,
    {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let group_keys: Vec<Key> = groups.into_iter().map(Into::into).collect();
        let hub = self.hub()?;
        hub.batch(|| {
            for group_key in &group_keys {
                let group = self.get_group(group_key)?;
                group.remove(keys.iter().cloned())?;
            }
            let orphans: Vec<Key> = keys
                .iter()
                .filter(|key| {
                    !self
                        .inner
                        .groups
                        .borrow()
                        .values()
                        .any(|group| group.has(key))
                })
                .cloned()
                .collect();
            self.remove_items(orphans).map(|_| ())
        })
    }

    /// Add existing item keys to groups, creating the groups as needed.
    pub fn put<I, G>(&self, keys: I, groups: G, config: GroupAddConfig) -> Result<()>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
        G: IntoIterator,
        G::Item: Into<Key>,
    {
        let keys: Vec<Key> = keys.into_iter().map(Into::into).collect();
        let hub = self.hub()?;
        hub.batch(|| {
            for group_key in groups {
                self.group_or_create(&hub, group_key.into())
                    .add(keys.iter().cloned(), config)?;
            }
            Ok(())
        })
    }

    /// Drop every item and empty every group.
    pub fn reset(&self) -> Result<()> {
        let keys: Vec<Key> = self.inner.items.borrow().keys().cloned().collect();
        self.remove_items(keys)?;
        let groups: Vec<Group<T>> = self.inner.groups.borrow().values().cloned().collect();
        for group in groups {
            group.keys_state().reset()?;
        }
        Ok(())
    }

    // ─── Groups ──────────────────────────────────────────────────────────

    fn group_or_create(&self, hub: &Hub, key: Key) -> Group<T> {
        if let Some(group) = self.inner.groups.borrow().get(&key) {
            return group.clone();
        }
        let group = Group::new(hub, self.downgrade(), key.clone(), Vec::new());
        self.inner.groups.borrow_mut().insert(key, group.clone());
        group
    }

    pub fn create_group(&self, key: impl Into<Key>, initial: Vec<Key>) -> Result<Group<T>> {
        let key = key.into();
        if self.has_group(&key) {
            warn!(collection = %self.inner.label(), group = %key, "collection.duplicate_group");
            return Err(RippleError::duplicate_key("group", &key));
        }
        let hub = self.hub()?;
        let group = Group::new(&hub, self.downgrade(), key.clone(), initial);
        self.inner.groups.borrow_mut().insert(key, group.clone());
        Ok(group)
    }

    #[must_use]
    pub fn has_group(&self, key: &Key) -> bool {
        self.inner.groups.borrow().contains_key(key)
    }

    pub fn get_group(&self, key: &Key) -> Result<Group<T>> {
        if let Some(group) = self.inner.groups.borrow().get(key) {
            return Ok(group.clone());
        }
        Err(self.group_not_found(key))
    }

    #[must_use]
    pub fn get_default_group(&self) -> Group<T> {
        self.inner.default_group.clone()
    }

    /// Remove a group. The default group cannot be removed; asking returns
    /// `Ok(false)`.
    pub fn remove_group(&self, key: &Key) -> Result<bool> {
        if *key == self.inner.default_group_key {
            warn!(collection = %self.inner.label(), "collection.default_group_protected");
            return Ok(false);
        }
        let removed = self.inner.groups.borrow_mut().shift_remove(key);
        match removed {
            Some(group) => {
                group.remove(group.keys_state().peek())?;
                Ok(true)
            }
            None => Err(self.group_not_found(key)),
        }
    }

    // ─── Selectors ───────────────────────────────────────────────────────

    pub fn create_selector(&self, key: impl Into<Key>, item_key: impl Into<Key>) -> Result<Selector<T>> {
        let key = key.into();
        if self.has_selector(&key) {
            warn!(collection = %self.inner.label(), selector = %key, "collection.duplicate_selector");
            return Err(RippleError::duplicate_key("selector", &key));
        }
        let hub = self.hub()?;
        let selector = Selector::new(&hub, self.downgrade(), key.clone());
        self.inner.selectors.borrow_mut().insert(key, selector.clone());
        selector.select(item_key, IngestConfig::default())?;
        Ok(selector)
    }

    /// Point the selector `key` at `item_key`, creating it if needed.
    pub fn select(&self, key: impl Into<Key>, item_key: impl Into<Key>) -> Result<Selector<T>> {
        let key = key.into();
        let existing = self.inner.selectors.borrow().get(&key).cloned();
        match existing {
            Some(selector) => {
                selector.select(item_key, IngestConfig::default())?;
                Ok(selector)
            }
            None => self.create_selector(key, item_key),
        }
    }

    #[must_use]
    pub fn has_selector(&self, key: &Key) -> bool {
        self.inner.selectors.borrow().contains_key(key)
    }

    pub fn get_selector(&self, key: &Key) -> Result<Selector<T>> {
        if let Some(selector) = self.inner.selectors.borrow().get(key) {
            return Ok(selector.clone());
        }
        warn!(collection = %self.inner.label(), selector = %key, "collection.selector_not_found");
        Err(RippleError::SelectorNotFound {
            collection: self.inner.label(),
            selector: key.clone(),
        })
    }

    pub fn remove_selector(&self, key: &Key) -> Result<()> {
        let removed = self.inner.selectors.borrow_mut().shift_remove(key);
        match removed {
            Some(selector) => selector.unselect(),
            None => Err(RippleError::SelectorNotFound {
                collection: self.inner.label(),
                selector: key.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ripple_core::HubConfig;
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use tracing_test::traced_test;

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
    fn collect_then_update() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        users
            .update(&Key::from("1"), json!({"name": "hans"}), UpdateConfig::default())
            .unwrap();
        assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "hans")));
    }

    #[test]
    fn update_of_unknown_item_leaves_collection_alone() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let err = users
            .update(&Key::from("99"), json!({"name": "x"}), UpdateConfig::default())
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(users.size(), 1);
        assert_eq!(users.get_all_item_values(), vec![user("1", "frank")]);
    }

    #[test]
    fn collect_is_all_or_nothing() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Loose {
            id: Option<u32>,
        }
        let hub = Hub::new(HubConfig::default().with_auto_integrate(false));
        let loose = Collection::new(&hub, CollectionConfig::default());
        let err = loose
            .collect([Loose { id: Some(1) }, Loose { id: None }], CollectConfig::default())
            .unwrap_err();
        assert!(matches!(err, RippleError::MissingPrimaryKey { .. }));
        assert_eq!(loose.size(), 0);
    }

    #[test]
    fn collect_existing_updates_in_place() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let item = users.get_item(&Key::from("1")).unwrap();
        users.collect([user("1", "jeff")], CollectConfig::default()).unwrap();
        assert!(item.ptr_eq(&users.get_item(&Key::from("1")).unwrap()));
        assert_eq!(item.peek(), user("1", "jeff"));
        assert_eq!(item.initial_value(), user("1", "frank"));
        assert_eq!(users.get_default_group().size(), 1);
    }

    #[test]
    fn collect_into_named_groups() {
        let (_hub, users) = users();
        users
            .collect(
                [user("1", "a"), user("2", "b")],
                CollectConfig::default().with_groups(["admins"]),
            )
            .unwrap();
        let admins = users.get_group(&Key::from("admins")).unwrap();
        assert_eq!(admins.output(), vec![user("1", "a"), user("2", "b")]);
        assert!(users.get_group(&Key::from("nobody")).is_err());
    }

    #[test]
    fn update_can_rekey() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        let selector = users.select("me", "1").unwrap();
        users
            .update(&Key::from("1"), json!({"id": "7"}), UpdateConfig::default())
            .unwrap();
        assert!(!users.has(&Key::from("1")));
        assert_eq!(users.get_item_value(&Key::from("7")), Some(user("7", "frank")));
        assert_eq!(
            users.get_default_group().keys(),
            vec![Key::from("7")]
        );
        assert_eq!(selector.item_key(), Some(Key::from("7")));
        assert_eq!(selector.value(), Some(user("7", "frank")));
    }

    #[test]
    #[traced_test]
    fn rekey_onto_taken_key_changes_nothing() {
        let (_hub, users) = users();
        users
            .collect([user("1", "frank"), user("7", "hans")], CollectConfig::default())
            .unwrap();
        let selector = users.select("me", "1").unwrap();

        let err = users
            .update(&Key::from("1"), json!({"id": "7", "name": "z"}), UpdateConfig::default())
            .unwrap_err();
        assert!(matches!(err, RippleError::DuplicateKey { kind: "item", .. }));
        assert!(logs_contain("collection.duplicate_item"));
        assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "frank")));
        assert_eq!(users.get_item_value(&Key::from("7")), Some(user("7", "hans")));

        assert!(users.update_item_key(&Key::from("1"), "7").is_err());
        assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "frank")));
        assert_eq!(
            users.get_default_group().keys(),
            vec![Key::from("1"), Key::from("7")]
        );
        assert_eq!(selector.value(), Some(user("1", "frank")));
    }

    #[test]
    fn replace_without_patch_keeps_primary_key() {
        let (_hub, users) = users();
        users.collect([user("1", "frank")], CollectConfig::default()).unwrap();
        users
            .update(
                &Key::from("1"),
                json!({"name": "solo"}),
                UpdateConfig::default().with_patch(false),
            )
            .unwrap();
        assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "solo")));
    }

    #[test]
    fn remove_from_last_group_removes_item() {
        let (_hub, users) = users();
        users
            .collect(
                [user("1", "a"), user("2", "b")],
                CollectConfig::default().with_groups(["team"]),
            )
            .unwrap();
        users
            .remove_from_groups([Key::from("1")], [Key::from("team")])
            .unwrap();
        assert!(users.has(&Key::from("1")));
        users
            .remove_from_groups([Key::from("1")], [Key::from(DEFAULT_GROUP_KEY)])
            .unwrap();
        assert!(!users.has(&Key::from("1")));
        assert_eq!(users.size(), 1);
    }

    #[test]
    fn put_and_remove_groups() {
        let (_hub, users) = users();
        users.collect([user("1", "a")], CollectConfig::default()).unwrap();
        users
            .put([Key::from("1")], [Key::from("stars")], GroupAddConfig::default())
            .unwrap();
        assert!(users.get_group(&Key::from("stars")).unwrap().has(&Key::from("1")));
        assert!(users.remove_group(&Key::from("stars")).unwrap());
        assert!(!users.remove_group(&Key::from(DEFAULT_GROUP_KEY)).unwrap());
        assert!(users.remove_group(&Key::from("stars")).is_err());
    }

    #[test]
    #[traced_test]
    fn removing_unknown_group_reports_not_found() {
        let (_hub, users) = users();
        users
            .collect([user("1", "a")], CollectConfig::default().with_groups(["team"]))
            .unwrap();
        let err = users.remove_group(&Key::from("ghosts")).unwrap_err();
        assert!(matches!(err, RippleError::GroupNotFound { .. }));
        assert!(logs_contain("collection.group_not_found"));
        assert!(users.has_group(&Key::from("team")));
        assert!(users.get_group(&Key::from("team")).unwrap().has(&Key::from("1")));
        assert_eq!(users.size(), 1);
    }

    #[test]
    fn selectors_are_registered() {
        let (_hub, users) = users();
        users.create_selector("me", "1").unwrap();
        assert!(users.create_selector("me", "2").is_err());
        assert!(users.has_selector(&Key::from("me")));
        users.remove_selector(&Key::from("me")).unwrap();
        assert!(users.get_selector(&Key::from("me")).is_err());
    }

    #[test]
    fn reset_empties_everything() {
        let (_hub, users) = users();
        users
            .collect([user("1", "a"), user("2", "b")], CollectConfig::default())
            .unwrap();
        users.reset().unwrap();
        assert_eq!(users.size(), 0);
        assert!(users.get_default_group().output().is_empty());
    }
}
