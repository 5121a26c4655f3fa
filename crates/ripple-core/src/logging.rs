#![forbid(unsafe_code)]

//! Optional tracing subscriber setup (feature `subscriber`).
//!
//! The library itself only emits `tracing` events; installing a subscriber
//! is the host's call. This helper covers the common case: an `EnvFilter`
//! read from `RIPPLE_LOG` (falling back to [`LogConfig::filter`]) feeding a
//! plain or JSON fmt layer.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable consulted before [`LogConfig::filter`].
pub const LOG_ENV: &str = "RIPPLE_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Directive used when `RIPPLE_LOG` is unset or invalid.
    pub filter: String,
    /// Emit one JSON object per event.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "warn".into(),
            json: false,
        }
    }
}

/// Install a global subscriber.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init(config: &LogConfig) -> bool {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok()
    }
}
