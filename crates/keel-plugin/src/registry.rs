//! Plugin registry: the `Plugin` trait and per-plugin lifecycle records.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keel_core::ConfigStore;

use crate::api::context::PluginContext;
use crate::extension::Extension;

/// Trait that all plugins implement.
///
/// Only [`Plugin::initialize`] is required. Every other capability has a
/// default: a plugin is named after its Rust type, offers an extension point
/// of the same name, is eager, enabled, single-mode, and has no
/// dependencies or teardown.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique plugin name.
    fn name(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    /// The extension point this plugin fills.
    ///
    /// Several plugins may offer the same point; configuration decides which
    /// one is enabled.
    fn extension_point(&self, _config: &ConfigStore) -> String {
        self.name()
    }

    /// Initialize as soon as collected rather than on first demand.
    fn eager(&self) -> bool {
        true
    }

    /// Whether this plugin is the active implementation of its point.
    ///
    /// Consulted at resolution time only.
    fn is_enabled(&self, _config: &ConfigStore) -> bool {
        true
    }

    /// Whether this plugin is one of several simultaneously active
    /// implementations of its point.
    fn is_multi_extension(&self, _config: &ConfigStore) -> bool {
        false
    }

    /// Extension points that must be initialized before this plugin.
    fn dependencies(&self, _config: &ConfigStore) -> Vec<String> {
        Vec::new()
    }

    /// Called exactly once, when the plugin is first registered.
    fn on_registration(&self, _config: &ConfigStore) {}

    /// Produces the extension value. Called at most once.
    fn initialize(&self, ctx: &PluginContext<'_>) -> anyhow::Result<Extension>;

    /// Tears down the value produced by `initialize`. Called at most once,
    /// in reverse startup order.
    fn shutdown(&self, _ctx: &PluginContext<'_>, _value: &Extension) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs once the async context is available.
    async fn async_ready(&self, _config: Arc<ConfigStore>, _value: Extension) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before `shutdown` when the async context is available.
    async fn async_stopping(
        &self,
        _config: Arc<ConfigStore>,
        _value: Extension,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Where a registered plugin is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Registered; `on_registration` has fired.
    Registered,
    /// Committed to its extension point but not yet initialized (lazy).
    Collected,
    /// `initialize` is running.
    Initializing,
    /// `initialize` produced its value.
    Initialized,
    /// `shutdown` has run.
    ShutDown,
}

/// Snapshot of a registered plugin.
#[derive(Debug, Clone)]
pub struct PluginInfo {
    /// Plugin name.
    pub name: String,
    /// Extension point the plugin offers.
    pub extension_point: String,
    /// Rust type implementing the plugin.
    pub type_name: &'static str,
    /// Current lifecycle state.
    pub state: LifecycleState,
    /// Whether `async_ready` has been claimed.
    pub async_ready_called: bool,
    /// Whether `async_stopping` has been claimed.
    pub async_stopping_called: bool,
    /// When the plugin was registered.
    pub registered_at: DateTime<Utc>,
}

/// Lifecycle record kept for each registered plugin.
pub(crate) struct PluginEntry {
    pub plugin: Arc<dyn Plugin>,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub extension_point: String,
    pub state: LifecycleState,
    pub value: Extension,
    pub async_ready_called: bool,
    pub async_stopping_called: bool,
    pub registered_at: DateTime<Utc>,
}

impl PluginEntry {
    pub fn new<P: Plugin>(plugin: Arc<dyn Plugin>, extension_point: String) -> Self {
        Self {
            plugin,
            type_id: TypeId::of::<P>(),
            type_name: std::any::type_name::<P>(),
            extension_point,
            state: LifecycleState::Registered,
            value: Extension::empty(),
            async_ready_called: false,
            async_stopping_called: false,
            registered_at: Utc::now(),
        }
    }

    fn info(&self, name: &str) -> PluginInfo {
        PluginInfo {
            name: name.to_string(),
            extension_point: self.extension_point.clone(),
            type_name: self.type_name,
            state: self.state,
            async_ready_called: self.async_ready_called,
            async_stopping_called: self.async_stopping_called,
            registered_at: self.registered_at,
        }
    }
}

/// Registry of declared plugins, one entry per unique name.
#[derive(Default)]
pub(crate) struct PluginRegistry {
    entries: HashMap<String, PluginEntry>,
    order: Vec<String>,
}

impl PluginRegistry {
    pub fn insert(&mut self, name: &str, entry: PluginEntry) {
        if self.entries.insert(name.to_string(), entry).is_none() {
            self.order.push(name.to_string());
        }
    }

    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut PluginEntry> {
        self.entries.get_mut(name)
    }

    /// Names in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        self.order
            .iter()
            .filter_map(|name| self.entries.get(name).map(|e| e.info(name)))
            .collect()
    }
}
