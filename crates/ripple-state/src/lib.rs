#![forbid(unsafe_code)]

//! Reactive primitives built on [`ripple_core`].
//!
//! - [`State`]: an observable value with history, watchers and side effects.
//! - [`Computed`]: a value derived from other observables, with its
//!   dependencies detected while it evaluates.
//! - [`Event`]: callbacks fired on demand, optionally re-rendering
//!   subscribers.
//! - [`Collection`]: keyed items with ordered [`Group`]s and single-item
//!   [`Selector`]s.
//!
//! Any primitive can be mirrored into the hub's storages with `persist`.
//!
//! ```ignore
//! let hub = Hub::default();
//! let count = State::new(&hub, 1);
//! let c = count.clone();
//! let doubled = Computed::new(&hub, move || c.value() * 2);
//! count.set(5)?;
//! assert_eq!(doubled.peek(), 10);
//! ```

pub mod collection;
pub mod computed;
pub mod event;
mod json;
pub mod persistent;
pub mod state;

pub use collection::{
    AddMethod, CollectConfig, Collection, CollectionConfig, CollectionPersistent, Group,
    GroupAddConfig, GroupObserver, Selector, UpdateConfig, group_storage_key, item_storage_key,
};
pub use computed::Computed;
pub use event::{Event, EventConfig, EventObserver};
pub use persistent::{PersistConfig, StatePersistent};
pub use state::{
    Change, PatchConfig, SideEffectFn, State, StateConfig, StateObserver, StateValue, WatcherFn,
};
