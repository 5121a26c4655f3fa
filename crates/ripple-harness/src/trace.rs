#![forbid(unsafe_code)]

//! Capturing diagnostics in tests.
//!
//! [`TraceCapture`] is a [`Layer`] that records every event message and
//! every span name it sees, along with the event level. [`capture`] runs a
//! closure under a registry with only that layer installed and returns what
//! was emitted.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    pub level: Level,
    pub message: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct CapturedTrace {
    pub events: Vec<CapturedEvent>,
    pub spans: Vec<String>,
}

impl CapturedTrace {
    #[must_use]
    pub fn has_event(&self, message: &str) -> bool {
        self.events.iter().any(|e| e.message == message)
    }

    #[must_use]
    pub fn count(&self, message: &str) -> usize {
        self.events.iter().filter(|e| e.message == message).count()
    }

    #[must_use]
    pub fn event(&self, message: &str) -> Option<&CapturedEvent> {
        self.events.iter().find(|e| e.message == message)
    }

    #[must_use]
    pub fn has_span(&self, name: &str) -> bool {
        self.spans.iter().any(|s| s == name)
    }
}

impl CapturedEvent {
    /// Debug rendering of field `name`, if the event carried it.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Clone, Default)]
pub struct TraceCapture {
    state: Arc<Mutex<CapturedTrace>>,
}

impl fmt::Debug for TraceCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceCapture").finish_non_exhaustive()
    }
}

impl TraceCapture {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> CapturedTrace {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct EventVisitor {
    message: Option<String>,
    fields: Vec<(String, String)>,
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.fields.push((field.name().to_owned(), value.to_owned()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered.trim_matches('"').to_owned());
        } else {
            self.fields.push((field.name().to_owned(), rendered));
        }
    }
}

impl<S> Layer<S> for TraceCapture
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::Id,
        _ctx: Context<'_, S>,
    ) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .spans
            .push(attrs.metadata().name().to_owned());
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = EventVisitor {
            message: None,
            fields: Vec::new(),
        };
        event.record(&mut visitor);
        let captured = CapturedEvent {
            level: *event.metadata().level(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
        };
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .events
            .push(captured);
    }
}

/// Run `f` with a capturing subscriber as the thread default.
pub fn capture<R>(f: impl FnOnce() -> R) -> (R, CapturedTrace) {
    let layer = TraceCapture::new();
    let subscriber = tracing_subscriber::registry().with(layer.clone());
    let result = tracing::subscriber::with_default(subscriber, f);
    (result, layer.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_events_and_spans() {
        let ((), trace) = capture(|| {
            let span = tracing::debug_span!("demo.span");
            let _entered = span.enter();
            tracing::warn!(count = 3, "demo.event");
        });
        assert!(trace.has_span("demo.span"));
        let event = trace.event("demo.event").unwrap();
        assert_eq!(event.level, Level::WARN);
        assert_eq!(event.field("count"), Some("3"));
        assert_eq!(trace.count("demo.event"), 1);
    }
}
