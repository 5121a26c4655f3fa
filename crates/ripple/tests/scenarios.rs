//! End-to-end behaviour through the public prelude.

use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use ripple::prelude::*;
use ripple_harness::{Fixture, capture};
use serde::{Deserialize, Serialize};
use serde_json::json;

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

#[test]
fn state_set_renders_once_after_flush() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let component = fx.mounted("counter");
    let state = State::new(&fx.hub, 10);
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("count", &state),
            SubscribeConfig::default(),
        )
        .unwrap();

    state.set(20).unwrap();
    fx.hub.flush();

    assert_eq!(state.value(), 20);
    assert_eq!(state.previous_value(), 10);
    assert_eq!(fx.recorder.count(), 1);
}

#[test]
fn collection_update_and_missing_item() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let users: Collection<User> =
        Collection::new(&fx.hub, CollectionConfig::default().with_key("users"));
    users
        .collect([user("1", "frank")], CollectConfig::default())
        .unwrap();
    users
        .update(&Key::from("1"), json!({"name": "hans"}), UpdateConfig::default())
        .unwrap();
    assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "hans")));

    let (result, trace) = capture(|| {
        users.update(&Key::from("99"), json!({"name": "x"}), UpdateConfig::default())
    });
    assert!(matches!(result, Err(RippleError::ItemNotFound { .. })));
    assert!(trace.has_event("collection.item_not_found"));
    assert_eq!(users.size(), 1);
    assert_eq!(users.get_all_item_values(), vec![user("1", "hans")]);
}

#[test]
fn rekey_onto_existing_item_is_rejected_without_side_effects() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let users: Collection<User> =
        Collection::new(&fx.hub, CollectionConfig::default().with_key("users"));
    users
        .collect([user("1", "frank"), user("7", "hans")], CollectConfig::default())
        .unwrap();

    let (result, trace) = capture(|| {
        users.update(
            &Key::from("1"),
            json!({"id": "7", "name": "z"}),
            UpdateConfig::default(),
        )
    });
    assert!(matches!(result, Err(RippleError::DuplicateKey { .. })));
    assert!(trace.has_event("collection.duplicate_item"));
    assert_eq!(users.get_item_value(&Key::from("1")), Some(user("1", "frank")));
    assert_eq!(users.get_item_value(&Key::from("7")), Some(user("7", "hans")));
    assert_eq!(users.size(), 2);
}

#[test]
fn persisted_collection_uses_storage_key_convention() {
    let fx = Fixture::with_memory(HubConfig::default()).unwrap();
    let users: Collection<User> =
        Collection::new(&fx.hub, CollectionConfig::default().with_key("users"));
    users.persist(PersistConfig::default()).unwrap();
    users
        .collect([user("1", "frank")], CollectConfig::default())
        .unwrap();

    assert_eq!(fx.stored("users"), Some(json!(true)));
    assert_eq!(
        fx.stored("_users_item_1"),
        Some(json!({"id": "1", "name": "frank"}))
    );
    assert_eq!(fx.stored("_users_group_default"), Some(json!(["1"])));
}

#[test]
fn persistence_waits_for_storage_registration() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let theme = State::with_config(
        &fx.hub,
        "dark".to_owned(),
        StateConfig::default().with_key("theme"),
    );
    theme.persist(PersistConfig::default()).unwrap();
    theme.set("light".to_owned()).unwrap();
    assert!(fx.memory.is_empty());

    fx.register_memory().unwrap();
    assert_eq!(fx.stored("theme"), Some(json!("light")));
    assert!(theme.is_persisted());
}

#[test]
fn unpersisted_state_stays_out_of_late_storage() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let theme = State::with_config(
        &fx.hub,
        "dark".to_owned(),
        StateConfig::default().with_key("theme"),
    );
    theme.persist(PersistConfig::default()).unwrap();
    theme.unpersist(false).unwrap();

    fx.register_memory().unwrap();
    theme.set("light".to_owned()).unwrap();
    assert_eq!(fx.stored("theme"), None);
    assert!(!theme.is_persisted());
}

#[test]
fn retries_are_bounded_and_value_survives() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let component = ripple_harness::TestComponent::create("never-mounted");
    let state = State::new(&fx.hub, 0);
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with(&state),
            SubscribeConfig::default(),
        )
        .unwrap();
    state.set(7).unwrap();

    for _ in 0..3 {
        fx.hub.flush();
    }
    let job = fx.hub.runtime().not_ready_jobs().pop().unwrap();
    assert_eq!(job.tries_to_update(), 3);

    fx.hub.flush();
    assert!(!fx.hub.runtime().has_not_ready_jobs());
    assert_eq!(fx.hub.runtime().stats().dropped_updates, 1);
    assert_eq!(state.peek(), 7);
    assert_eq!(fx.recorder.count(), 0);
}

#[test]
fn late_mount_delivers_waiting_render() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let component = ripple_harness::TestComponent::create("late");
    let state = State::new(&fx.hub, 0);
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with(&state),
            SubscribeConfig::default(),
        )
        .unwrap();
    state.set(1).unwrap();
    fx.hub.flush();
    assert_eq!(fx.recorder.count(), 0);

    fx.hub.sub_controller().mount(&component);
    fx.hub.flush();
    assert_eq!(fx.recorder.count_for(component.id()), 1);
}

#[test]
fn placeholder_first_set_forces_and_overwrites() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let state = State::placeholder(&fx.hub, 0);
    state.set(0).unwrap();
    assert_eq!(fx.hub.runtime().stats().jobs_performed, 1);
    assert!(!state.is_placeholder());
    assert!(!state.is_set());

    state.set(0).unwrap();
    assert_eq!(fx.hub.runtime().stats().jobs_performed, 1);
}

#[test]
fn side_effects_honour_weights_and_exclusions() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let state = State::new(&fx.hub, 0);
    let log = Rc::new(RefCell::new(Vec::new()));
    for (key, weight) in [("a", 10), ("b", 13), ("c", 100)] {
        let log = Rc::clone(&log);
        state.add_side_effect(key, weight, move |_| log.borrow_mut().push(key));
    }
    state
        .set_with(
            1,
            IngestConfig::default().with_side_effects(SideEffectConfig::excluding(["b"])),
        )
        .unwrap();
    assert_eq!(*log.borrow(), vec!["c", "a"]);
}

#[test]
fn selector_waits_for_item_then_follows_updates() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let users: Collection<User> =
        Collection::new(&fx.hub, CollectionConfig::default().with_key("users"));
    let current = users.create_selector("current", "7").unwrap();
    assert_eq!(current.value(), None);
    assert!(current.state().is_placeholder());

    users
        .collect([user("7", "frank")], CollectConfig::default())
        .unwrap();
    assert_eq!(current.value(), Some(user("7", "frank")));
    assert!(current.has_selected(&Key::from("7")));

    users
        .update(&Key::from("7"), json!({"name": "hans"}), UpdateConfig::default())
        .unwrap();
    assert_eq!(current.value(), Some(user("7", "hans")));
}

#[test]
fn event_callbacks_stop_after_max_uses() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let saved: Event<String> = Event::new(&fx.hub, EventConfig::default().with_max_uses(2));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    saved.on(move |name| sink.borrow_mut().push(name.clone()));

    assert!(saved.trigger(&"a".to_owned()));
    assert!(saved.trigger(&"b".to_owned()));
    assert!(!saved.trigger(&"c".to_owned()));
    assert_eq!(*seen.borrow(), vec!["a", "b"]);
    assert!(!saved.is_enabled());
}

proptest! {
    #[test]
    fn any_number_of_writes_renders_once(writes in proptest::collection::vec((0usize..4, any::<i32>()), 1..32)) {
        let fx = Fixture::new(HubConfig::default()).unwrap();
        let component = fx.mounted("grid");
        let cells: Vec<State<i32>> = (0..4).map(|_| State::new(&fx.hub, 0)).collect();
        let subs = cells
            .iter()
            .enumerate()
            .fold(Subs::new(), |subs, (i, cell)| subs.with_key(format!("c{i}"), cell));
        fx.hub
            .subscribe(SubscriptionTarget::component(&component), subs, SubscribeConfig::default())
            .unwrap();

        let mut changed = false;
        for (index, value) in writes {
            changed |= cells[index].peek() != value;
            cells[index].set(value).unwrap();
        }
        fx.hub.flush();
        prop_assert_eq!(fx.recorder.count(), usize::from(changed));
    }
}
