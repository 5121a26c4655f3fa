#![forbid(unsafe_code)]

//! Bridges from observers to external consumers.
//!
//! A consumer is either a UI [`Component`] (updated through the hub's
//! integrations) or a plain callback. [`SubController`] creates one
//! [`SubscriptionContainer`] per `subscribe` call and attaches it to every
//! observer the consumer depends on; the runtime later collects the
//! containers touched by a batch and notifies each one once.

pub mod container;
pub mod controller;

pub use container::{
    Component, ComponentId, ContainerId, ContainerKind, Selection, SubscriptionContainer,
    UpdatedData,
};
pub use controller::{SubController, SubscribeConfig, Subscribed, Subs, SubscriptionTarget};
