#![forbid(unsafe_code)]

//! Test fixtures for Ripple.
//!
//! - [`recorder::Recorder`]: an integration that records every update call.
//! - [`fixtures`]: hubs wired to a memory storage and a recorder, plus a
//!   plain component type.
//! - [`trace::TraceCapture`]: a `tracing_subscriber` layer that collects
//!   event and span names so tests can assert on diagnostics across crates.

pub mod fixtures;
pub mod recorder;
pub mod trace;

pub use fixtures::{Fixture, TestComponent};
pub use recorder::{RecordedUpdate, Recorder};
pub use trace::{CapturedEvent, CapturedTrace, TraceCapture, capture};
