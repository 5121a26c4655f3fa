#![forbid(unsafe_code)]

//! Observer graph, job runtime and subscription plumbing for Ripple.
//!
//! # Architecture
//!
//! ```text
//! mutation ─► Observer::ingest ─► RuntimeJob ─► Runtime (FIFO perform)
//!                                                  │
//!                          dependents re-ingested ◄┤
//!                                                  ▼
//!                         flush: SubscriptionContainer ─► Integrations
//! ```
//!
//! - [`Hub`]: the top-level instance owning every subsystem below.
//! - [`Observer`] / [`ObserverCore`]: graph nodes. Primitives in
//!   `ripple-state` implement `Observer` for their own observer types.
//! - [`RuntimeJob`]: one pending value transition.
//! - [`Runtime`]: performs jobs in order and batches UI flushes.
//! - [`ComputedTracker`]: records observer reads while a computed value
//!   evaluates.
//! - [`SubController`]: binds observers to components and callbacks.
//! - [`Integrations`]: adapters that re-render components.
//!
//! Everything is single-threaded (`Rc`, `RefCell`); a hub and its
//! primitives live on one thread.

pub mod config;
pub mod error;
pub mod hub;
pub mod integration;
pub mod job;
pub mod key;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod observer;
pub mod runtime;
pub mod side_effects;
pub mod subscription;
pub mod tracker;

pub use config::HubConfig;
pub use error::{Result, RippleError};
pub use hub::{Hub, WeakHub};
pub use integration::{Integration, Integrations};
pub use job::{IngestConfig, JobConfig, JobState, RuntimeJob, SideEffectConfig, Trail};
pub use key::Key;
pub use observer::{Observable, Observer, ObserverCore, ObserverId, ingest_job};
pub use runtime::{Runtime, RuntimeStats, Scheduler};
pub use side_effects::{SideEffect, SideEffectList};
pub use subscription::{
    Component, ComponentId, ContainerId, ContainerKind, Selection, SubController,
    SubscribeConfig, Subscribed, Subs, SubscriptionContainer, SubscriptionTarget, UpdatedData,
};
pub use tracker::ComputedTracker;

// Re-exported so primitives and hosts share one storage vocabulary.
pub use ripple_storage as storage;
