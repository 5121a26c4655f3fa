//! Primitives feeding subscribed components through the runtime.

use pretty_assertions::assert_eq;
use ripple_core::{
    HubConfig, IngestConfig, Key, Selection, SubscribeConfig, Subs, SubscriptionTarget,
};
use ripple_harness::{Fixture, capture};
use ripple_state::{
    CollectConfig, Collection, CollectionConfig, Computed, PatchConfig, State, StateConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Profile {
    name: String,
    age: u32,
}

#[test]
fn one_render_per_flush_with_merged_data() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let component = fx.mounted("panel");
    let first = State::with_config(&fx.hub, 1, StateConfig::default().with_key("first"));
    let second = State::with_config(&fx.hub, 2, StateConfig::default().with_key("second"));
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with(&first).with(&second),
            SubscribeConfig::default(),
        )
        .unwrap();

    first.set(10).unwrap();
    second.set(20).unwrap();
    assert_eq!(fx.recorder.count(), 0);
    assert_eq!(fx.hub.flush(), 1);

    let call = fx.recorder.last().unwrap();
    assert_eq!(call.component, component.id());
    assert_eq!(call.data.get("first"), Some(&json!(10)));
    assert_eq!(call.data.get("second"), Some(&json!(20)));
    assert_eq!(fx.recorder.count(), 1);
}

#[test]
fn background_jobs_commit_without_rendering() {
    let fx = Fixture::new(HubConfig::default().with_bucket(false)).unwrap();
    let component = fx.mounted("panel");
    let state = State::new(&fx.hub, 0);
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("n", &state),
            SubscribeConfig::default(),
        )
        .unwrap();

    state
        .set_with(1, IngestConfig::default().with_background(true))
        .unwrap();
    assert_eq!(state.peek(), 1);
    assert_eq!(fx.recorder.count(), 0);

    state.set(2).unwrap();
    assert_eq!(fx.recorder.count(), 1);
}

#[test]
fn selections_narrow_renders() {
    let fx = Fixture::new(HubConfig::default().with_bucket(false)).unwrap();
    let component = fx.mounted("badge");
    let profile = State::new(
        &fx.hub,
        Profile {
            name: "frank".into(),
            age: 30,
        },
    );
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("profile", &profile),
            SubscribeConfig::default().with_selector("profile", Selection::path(["name"])),
        )
        .unwrap();

    profile.patch(json!({"age": 31}), PatchConfig::default()).unwrap();
    assert_eq!(fx.recorder.count(), 0);
    profile
        .patch(json!({"name": "hans"}), PatchConfig::default())
        .unwrap();
    assert_eq!(fx.recorder.count(), 1);
}

#[test]
fn selections_compare_only_the_last_commit_before_a_flush() {
    let fx = Fixture::new(HubConfig::default()).unwrap();
    let component = fx.mounted("badge");
    let profile = State::new(
        &fx.hub,
        Profile {
            name: "frank".into(),
            age: 30,
        },
    );
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("profile", &profile),
            SubscribeConfig::default().with_selector("profile", Selection::path(["name"])),
        )
        .unwrap();

    profile
        .patch(json!({"name": "hans"}), PatchConfig::default())
        .unwrap();
    profile.patch(json!({"age": 31}), PatchConfig::default()).unwrap();
    assert_eq!(fx.hub.flush(), 0);
    assert_eq!(fx.recorder.count(), 0);

    profile
        .patch(json!({"name": "jan"}), PatchConfig::default())
        .unwrap();
    assert_eq!(fx.hub.flush(), 1);
    assert_eq!(fx.recorder.count(), 1);
}

#[test]
fn computed_renders_when_its_source_changes() {
    let fx = Fixture::new(HubConfig::default().with_bucket(false)).unwrap();
    let component = fx.mounted("total");
    let price = State::new(&fx.hub, 3);
    let qty = State::new(&fx.hub, 2);
    let (p, q) = (price.clone(), qty.clone());
    let total = Computed::new(&fx.hub, move || p.value() * q.value());
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("total", &total),
            SubscribeConfig::default(),
        )
        .unwrap();

    fx.hub.batch(|| {
        price.set(5).unwrap();
        qty.set(4).unwrap();
    });
    assert_eq!(total.peek(), 20);
    assert_eq!(fx.recorder.count(), 1);
    assert_eq!(fx.recorder.last().unwrap().data.get("total"), Some(&json!(20)));
}

#[test]
fn group_output_reaches_subscribers() {
    let fx = Fixture::new(HubConfig::default().with_bucket(false)).unwrap();
    let component = fx.mounted("list");
    let todos: Collection<serde_json::Value> =
        Collection::new(&fx.hub, CollectionConfig::default().with_key("todos"));
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with_key("todos", &todos.get_default_group()),
            SubscribeConfig::default(),
        )
        .unwrap();

    todos
        .collect(
            [json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b"})],
            CollectConfig::default(),
        )
        .unwrap();
    assert_eq!(fx.recorder.count(), 1);
    assert_eq!(
        fx.recorder.last().unwrap().data.get("todos"),
        Some(&json!([{"id": 1, "title": "a"}, {"id": 2, "title": "b"}]))
    );

    todos
        .update(&Key::Int(2), json!({"title": "B"}), Default::default())
        .unwrap();
    assert_eq!(fx.recorder.count(), 2);
}

#[test]
fn unmounted_component_exhausts_retries() {
    let fx = Fixture::new(HubConfig::default().with_max_tries_to_update(Some(2))).unwrap();
    let component = ripple_harness::TestComponent::create("hidden");
    let state = State::new(&fx.hub, 0);
    fx.hub
        .subscribe(
            SubscriptionTarget::component(&component),
            Subs::new().with(&state),
            SubscribeConfig::default(),
        )
        .unwrap();

    state.set(1).unwrap();
    let ((), trace) = capture(|| {
        for _ in 0..4 {
            fx.hub.flush();
        }
    });
    assert_eq!(state.peek(), 1);
    assert_eq!(fx.recorder.count(), 0);
    assert!(!fx.hub.runtime().has_not_ready_jobs());
    assert_eq!(trace.count("runtime.job_dropped"), 1);
}
