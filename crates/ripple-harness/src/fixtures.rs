#![forbid(unsafe_code)]

//! Ready-made hubs for tests.

use ripple_core::{Component, Hub, HubConfig, Result};
use ripple_storage::{MemoryStorage, RegisterConfig, Storage};

use crate::recorder::Recorder;

pub const RECORDER_KEY: &str = "recorder";
pub const MEMORY_STORAGE_KEY: &str = "memory";

/// The component instance tests subscribe with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestComponent {
    pub name: String,
}

impl TestComponent {
    /// A fresh component wrapping a `TestComponent` named `name`.
    #[must_use]
    pub fn create(name: &str) -> Component {
        Component::new(Self {
            name: name.to_owned(),
        })
    }
}

/// A hub with a recording integration and, optionally, a memory storage.
#[derive(Debug)]
pub struct Fixture {
    pub hub: Hub,
    pub recorder: Recorder,
    pub memory: MemoryStorage,
}

impl Fixture {
    /// Integrated hub, no storage registered yet.
    pub fn new(config: HubConfig) -> Result<Self> {
        let hub = Hub::new(config.with_auto_integrate(false));
        let recorder = Recorder::new();
        hub.integrate(recorder.integration(RECORDER_KEY))?;
        Ok(Self {
            hub,
            recorder,
            memory: MemoryStorage::new(),
        })
    }

    /// Integrated hub with [`Fixture::memory`] registered as the default
    /// storage.
    pub fn with_memory(config: HubConfig) -> Result<Self> {
        let fixture = Self::new(config)?;
        fixture.register_memory()?;
        Ok(fixture)
    }

    pub fn register_memory(&self) -> Result<()> {
        let storage = Storage::new(MEMORY_STORAGE_KEY, self.memory.clone())?;
        self.hub.register_storage(storage, RegisterConfig::default())
    }

    /// Create a component and mark it mounted.
    #[must_use]
    pub fn mounted(&self, name: &str) -> Component {
        let component = TestComponent::create(name);
        self.hub.sub_controller().mount(&component);
        component
    }

    /// Stored entry at `key`, parsed as JSON.
    #[must_use]
    pub fn stored(&self, key: &str) -> Option<serde_json::Value> {
        self.memory
            .raw(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }
}
