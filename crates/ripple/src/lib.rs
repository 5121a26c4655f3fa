#![forbid(unsafe_code)]

//! Ripple public facade crate.
//!
//! Reactive state for UI hosts: observable primitives that propagate changes
//! through a dependency graph and re-render subscribed components once per
//! flush, with optional persistence.
//!
//! ```ignore
//! use ripple::prelude::*;
//!
//! let hub = Hub::new(HubConfig::default());
//! let name = State::new(&hub, String::from("frank"));
//! name.set("hans".into())?;
//! hub.flush();
//! ```

pub use ripple_core as core;
pub use ripple_state as state;
pub use ripple_storage as storage;

pub mod prelude {
    pub use ripple_core::{
        Component, Hub, HubConfig, IngestConfig, Integration, Key, Observable, Result,
        RippleError, Selection, SideEffectConfig, SubscribeConfig, Subs, SubscriptionTarget,
    };
    pub use ripple_state::{
        AddMethod, CollectConfig, Collection, CollectionConfig, Computed, Event, EventConfig,
        Group, GroupAddConfig, PatchConfig, PersistConfig, Selector, State, StateConfig,
        UpdateConfig,
    };
    pub use ripple_storage::{MemoryStorage, RegisterConfig, Storage, StorageMethods};
}
