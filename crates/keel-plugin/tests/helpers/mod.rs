//! Shared test helpers.

#![allow(dead_code)]

use std::sync::Arc;

use keel_core::ConfigStore;
use keel_core::config::{EnvPlacement, LifecycleConfig};
use keel_plugin::prelude::*;
use parking_lot::Mutex;

/// Ordered record of lifecycle calls, e.g. `init:a`, `shutdown:a`.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Creates a manager whose configuration ignores the process environment.
pub fn manager() -> PluginManager {
    PluginManager::new(Arc::new(ConfigStore::with_placement(EnvPlacement::Ignored)))
}

/// Creates a manager with explicit lifecycle settings.
pub fn manager_with(settings: LifecycleConfig) -> PluginManager {
    PluginManager::with_settings(
        Arc::new(ConfigStore::with_placement(EnvPlacement::Ignored)),
        &settings,
    )
}

/// A configurable plugin that records every lifecycle call.
///
/// Its extension value is its own name as a `String`.
#[derive(Clone)]
pub struct Recorder {
    pub name: String,
    pub extension_point: String,
    pub dependencies: Vec<String>,
    pub eager: bool,
    pub enabled: bool,
    pub multi: bool,
    pub fail_initialize: bool,
    pub fail_shutdown: bool,
    pub fail_async: bool,
    pub async_delay: Option<std::time::Duration>,
    pub log: CallLog,
}

impl Recorder {
    pub fn new(name: &str, log: &CallLog) -> Self {
        Self {
            name: name.to_string(),
            extension_point: name.to_string(),
            dependencies: Vec::new(),
            eager: true,
            enabled: true,
            multi: false,
            fail_initialize: false,
            fail_shutdown: false,
            fail_async: false,
            async_delay: None,
            log: log.clone(),
        }
    }

    pub fn at(mut self, extension_point: &str) -> Self {
        self.extension_point = extension_point.to_string();
        self
    }

    pub fn depends_on(mut self, extension_point: &str) -> Self {
        self.dependencies.push(extension_point.to_string());
        self
    }

    pub fn lazy(mut self) -> Self {
        self.eager = false;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    pub fn failing_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub fn failing_async(mut self) -> Self {
        self.fail_async = true;
        self
    }

    pub fn slow_async(mut self, delay: std::time::Duration) -> Self {
        self.async_delay = Some(delay);
        self
    }

    fn record(&self, call: &str) {
        self.log.lock().push(format!("{call}:{}", self.name));
    }
}

#[async_trait]
impl Plugin for Recorder {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn extension_point(&self, _config: &ConfigStore) -> String {
        self.extension_point.clone()
    }

    fn eager(&self) -> bool {
        self.eager
    }

    fn is_enabled(&self, _config: &ConfigStore) -> bool {
        self.enabled
    }

    fn is_multi_extension(&self, _config: &ConfigStore) -> bool {
        self.multi
    }

    fn dependencies(&self, _config: &ConfigStore) -> Vec<String> {
        self.dependencies.clone()
    }

    fn on_registration(&self, _config: &ConfigStore) {
        self.record("register");
    }

    fn initialize(&self, _ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        if self.fail_initialize {
            anyhow::bail!("{} refused to start", self.name);
        }
        self.record("init");
        Ok(Extension::new(self.name.clone()))
    }

    fn shutdown(&self, _ctx: &PluginContext<'_>, _value: &Extension) -> anyhow::Result<()> {
        self.record("shutdown");
        if self.fail_shutdown {
            anyhow::bail!("{} refused to stop", self.name);
        }
        Ok(())
    }

    async fn async_ready(&self, _config: Arc<ConfigStore>, value: Extension) -> anyhow::Result<()> {
        if let Some(delay) = self.async_delay {
            tokio::time::sleep(delay).await;
        }
        assert_eq!(value.downcast_ref::<String>(), Some(&self.name));
        self.record("ready");
        if self.fail_async {
            anyhow::bail!("{} is not ready", self.name);
        }
        Ok(())
    }

    async fn async_stopping(
        &self,
        _config: Arc<ConfigStore>,
        _value: Extension,
    ) -> anyhow::Result<()> {
        if let Some(delay) = self.async_delay {
            tokio::time::sleep(delay).await;
        }
        self.record("stopping");
        if self.fail_async {
            anyhow::bail!("{} cannot stop", self.name);
        }
        Ok(())
    }
}

/// Calls of one kind, in order, e.g. `calls(&log, "init")`.
pub fn calls(log: &CallLog, kind: &str) -> Vec<String> {
    let prefix = format!("{kind}:");
    log.lock()
        .iter()
        .filter_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        .collect()
}
