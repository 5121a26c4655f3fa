#![forbid(unsafe_code)]

//! Hub configuration.
//!
//! Defaults come from [`HubConfig::default`]; [`HubConfig::from_env`] layers
//! `RIPPLE_*` environment variables on top of them.
//!
//! | Variable                      | Field                 |
//! |-------------------------------|-----------------------|
//! | `RIPPLE_BUCKET`               | `bucket`              |
//! | `RIPPLE_WAIT_FOR_MOUNT`       | `wait_for_mount`      |
//! | `RIPPLE_MAX_TRIES_TO_UPDATE`  | `max_tries_to_update` (`0` = unlimited) |
//! | `RIPPLE_AUTO_INTEGRATE`       | `auto_integrate`      |

use std::env;

use crate::key::Key;

/// Default number of flushes a render signal survives while its container is
/// not ready.
pub const DEFAULT_MAX_TRIES_TO_UPDATE: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Optional name, used in logs.
    pub key: Option<Key>,
    /// Defer UI flushes to the next tick (a scheduler task or an explicit
    /// `Hub::flush`). When false the runtime flushes as soon as its queue
    /// drains.
    pub bucket: bool,
    /// Component subscriptions start not-ready until their component mounts.
    pub wait_for_mount: bool,
    /// Default retry budget for render signals aimed at not-ready
    /// containers. `None` retries forever.
    pub max_tries_to_update: Option<u32>,
    /// Integrate every initial integration when the hub is created.
    pub auto_integrate: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            key: None,
            bucket: true,
            wait_for_mount: true,
            max_tries_to_update: Some(DEFAULT_MAX_TRIES_TO_UPDATE),
            auto_integrate: true,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    if value == "1" || value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value == "0" || value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

impl HubConfig {
    /// Defaults overridden by `RIPPLE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RIPPLE_BUCKET")
            && let Some(flag) = parse_flag(&val)
        {
            config.bucket = flag;
        }
        if let Ok(val) = env::var("RIPPLE_WAIT_FOR_MOUNT")
            && let Some(flag) = parse_flag(&val)
        {
            config.wait_for_mount = flag;
        }
        if let Ok(val) = env::var("RIPPLE_MAX_TRIES_TO_UPDATE")
            && let Ok(n) = val.parse::<u32>()
        {
            config.max_tries_to_update = (n > 0).then_some(n);
        }
        if let Ok(val) = env::var("RIPPLE_AUTO_INTEGRATE")
            && let Some(flag) = parse_flag(&val)
        {
            config.auto_integrate = flag;
        }

        config
    }

    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    #[must_use]
    pub fn with_bucket(mut self, bucket: bool) -> Self {
        self.bucket = bucket;
        self
    }

    #[must_use]
    pub fn with_wait_for_mount(mut self, wait: bool) -> Self {
        self.wait_for_mount = wait;
        self
    }

    #[must_use]
    pub fn with_max_tries_to_update(mut self, tries: Option<u32>) -> Self {
        self.max_tries_to_update = tries;
        self
    }

    #[must_use]
    pub fn with_auto_integrate(mut self, auto: bool) -> Self {
        self.auto_integrate = auto;
        self
    }
}
