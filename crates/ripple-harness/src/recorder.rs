#![forbid(unsafe_code)]

//! An integration that remembers what it was asked to render.

use std::cell::RefCell;
use std::rc::Rc;

use ripple_core::{ComponentId, Integration, UpdatedData};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedUpdate {
    pub component: ComponentId,
    pub data: UpdatedData,
}

/// Shared log of update calls. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    calls: Rc<RefCell<Vec<RecordedUpdate>>>,
}

impl Recorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An integration under `key` whose update method appends to this log.
    #[must_use]
    pub fn integration(&self, key: &str) -> Integration {
        let calls = Rc::clone(&self.calls);
        Integration::new(key).with_update_method(move |component, data| {
            calls.borrow_mut().push(RecordedUpdate {
                component: component.id(),
                data: data.clone(),
            });
        })
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedUpdate> {
        self.calls.borrow().clone()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.calls.borrow().len()
    }

    #[must_use]
    pub fn count_for(&self, component: ComponentId) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.component == component)
            .count()
    }

    #[must_use]
    pub fn last(&self) -> Option<RecordedUpdate> {
        self.calls.borrow().last().cloned()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}
