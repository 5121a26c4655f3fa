#![forbid(unsafe_code)]

//! Dependency recording for computed values.
//!
//! # Design
//!
//! The tracker belongs to a [`Hub`](crate::Hub), not to the process. Each
//! [`track`](ComputedTracker::track) pushes a fresh frame and
//! [`get_tracked_observers`](ComputedTracker::get_tracked_observers) pops it,
//! so a computed that reads another computed while it recomputes records
//! into its own frame and cannot corrupt the outer one.
//!
//! # Invariants
//!
//! 1. Reads are recorded into the innermost frame only.
//! 2. Within a frame, observers are returned in first-access order without
//!    duplicates.
//! 3. Tracking is off once every frame has been popped.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::observer::{Observer, ObserverId};

type Frame = IndexMap<ObserverId, Rc<dyn Observer>>;

#[derive(Default)]
pub struct ComputedTracker {
    frames: RefCell<Vec<Frame>>,
}

impl fmt::Debug for ComputedTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedTracker")
            .field("depth", &self.frames.borrow().len())
            .finish()
    }
}

impl ComputedTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording reads.
    pub fn track(&self) {
        self.frames.borrow_mut().push(Frame::new());
    }

    /// Record a read of `observer` if tracking is active.
    pub fn tracked(&self, observer: &Rc<dyn Observer>) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            frame
                .entry(observer.core().id())
                .or_insert_with(|| Rc::clone(observer));
        }
    }

    /// Stop recording and return what was read, in access order.
    pub fn get_tracked_observers(&self) -> Vec<Rc<dyn Observer>> {
        self.frames
            .borrow_mut()
            .pop()
            .map(|frame| frame.into_values().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        !self.frames.borrow().is_empty()
    }

    /// Run `f` with tracking on and return its result with the observers it
    /// read. The frame is popped even if `f` unwinds.
    pub fn track_with<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<Rc<dyn Observer>>) {
        struct FrameGuard<'a> {
            tracker: &'a ComputedTracker,
            depth: usize,
        }

        impl Drop for FrameGuard<'_> {
            fn drop(&mut self) {
                self.tracker.frames.borrow_mut().truncate(self.depth);
            }
        }

        let depth = self.frames.borrow().len();
        self.track();
        let guard = FrameGuard {
            tracker: self,
            depth,
        };
        let result = f();
        let observers = self.get_tracked_observers();
        drop(guard);
        (result, observers)
    }
}
