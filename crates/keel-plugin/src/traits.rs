//! Conveniences for writing plugins without a dedicated type.

use std::sync::Arc;

use async_trait::async_trait;
use keel_core::ConfigStore;
use keel_core::config::Value;

use crate::api::context::PluginContext;
use crate::extension::Extension;
use crate::registry::Plugin;

type InitFn = Arc<dyn Fn(&PluginContext<'_>) -> anyhow::Result<Extension> + Send + Sync>;
type ShutdownFn = Arc<dyn Fn(&Extension) -> anyhow::Result<()> + Send + Sync>;

/// A lazy, closure-backed plugin filling a single extension point.
///
/// Created by [`PluginManager::set_extension`](crate::PluginManager::set_extension).
pub struct FnPlugin {
    extension_point: String,
    dependencies: Vec<String>,
    init_fn: InitFn,
    shutdown_fn: Option<ShutdownFn>,
}

impl FnPlugin {
    /// Creates a closure-backed plugin.
    pub fn new<I, S>(
        extension_point: &str,
        dependencies: Vec<String>,
        init_fn: I,
        shutdown_fn: Option<S>,
    ) -> Self
    where
        I: Fn(&PluginContext<'_>) -> anyhow::Result<Extension> + Send + Sync + 'static,
        S: Fn(&Extension) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            extension_point: extension_point.to_string(),
            dependencies,
            init_fn: Arc::new(init_fn),
            shutdown_fn: shutdown_fn.map(|f| Arc::new(f) as ShutdownFn),
        }
    }
}

impl std::fmt::Debug for FnPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPlugin")
            .field("extension_point", &self.extension_point)
            .field("dependencies", &self.dependencies)
            .field("init_fn", &"<closure>")
            .field("shutdown_fn", &self.shutdown_fn.as_ref().map(|_| "<closure>"))
            .finish()
    }
}

#[async_trait]
impl Plugin for FnPlugin {
    fn name(&self) -> String {
        format!("SetExtension|{}|", self.extension_point)
    }

    fn extension_point(&self, _config: &ConfigStore) -> String {
        self.extension_point.clone()
    }

    fn eager(&self) -> bool {
        false
    }

    fn dependencies(&self, _config: &ConfigStore) -> Vec<String> {
        self.dependencies.clone()
    }

    fn initialize(&self, ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        (self.init_fn)(ctx)
    }

    fn shutdown(&self, _ctx: &PluginContext<'_>, value: &Extension) -> anyhow::Result<()> {
        match &self.shutdown_fn {
            Some(shutdown_fn) => shutdown_fn(value),
            None => Ok(()),
        }
    }
}

/// Whether the configuration option `key` selects `expected`.
///
/// Used from [`Plugin::is_enabled`] so that one of several plugins offering
/// the same extension point is chosen by configuration, e.g. a `DB_BACKEND`
/// key naming the active backend. `default` is registered as the durable
/// default of `key`.
pub fn option_selects(config: &ConfigStore, key: &str, default: &str, expected: &str) -> bool {
    match config.environ_or(key, default) {
        Value::String(selected) => selected == expected,
        other => other.to_string() == expected,
    }
}
