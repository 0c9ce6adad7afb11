//! Plugin lifecycle settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings for plugin startup, shutdown, and the async lifecycle bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Run async hooks automatically when a context has been captured.
    #[serde(default = "default_true")]
    pub async_auto: bool,
    /// How long a foreign thread waits for an async hook. `0` waits forever.
    #[serde(default = "default_async_timeout")]
    pub async_timeout_seconds: u64,
    /// Keep the first captured context instead of refreshing it.
    #[serde(default)]
    pub capture_once: bool,
}

impl LifecycleConfig {
    /// The bridge timeout, `None` meaning unbounded.
    pub fn async_timeout(&self) -> Option<Duration> {
        (self.async_timeout_seconds > 0).then(|| Duration::from_secs(self.async_timeout_seconds))
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            async_auto: true,
            async_timeout_seconds: default_async_timeout(),
            capture_once: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_async_timeout() -> u64 {
    30
}
