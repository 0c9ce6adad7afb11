//! Plugin manager: registration and extension resolution.
//!
//! The manager owns the plugin registry, the extension point registry, and
//! the startup order. Lifecycle driving lives in [`crate::lifecycle`] and
//! the async bridge in [`crate::bridge`].
//!
//! Registration and resolution are expected to happen from one thread at a
//! time during bootstrap. The internal mutex is never held while plugin code
//! runs, so plugins may call back into the manager.

use std::any::TypeId;
use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::ConfigStore;
use keel_core::config::LifecycleConfig;
use parking_lot::Mutex;
use tracing::debug;

use crate::api::context::PluginContext;
use crate::bridge::AsyncBridge;
use crate::error::{PluginError, PluginResult};
use crate::extension::{Extension, ExtensionRegistry};
use crate::registry::{LifecycleState, Plugin, PluginEntry, PluginInfo, PluginRegistry};
use crate::traits::FnPlugin;

/// Mutable bookkeeping shared by registration and the lifecycle.
#[derive(Default)]
pub(crate) struct LifecycleTables {
    pub plugins: PluginRegistry,
    pub extensions: ExtensionRegistry,
    /// Plugin names in the order each was first collected.
    pub startup_order: Vec<String>,
    /// `(plugin, extension point)` of every `initialize` currently running,
    /// outermost first.
    pub in_progress: Vec<(String, String)>,
}

/// Registers plugins, resolves extension points, and drives the lifecycle.
pub struct PluginManager {
    config: Arc<ConfigStore>,
    pub(crate) tables: Mutex<LifecycleTables>,
    pub(crate) bridge: AsyncBridge,
}

impl PluginManager {
    /// Creates a manager with default lifecycle settings.
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self::with_settings(config, &LifecycleConfig::default())
    }

    /// Creates a manager with the given lifecycle settings.
    pub fn with_settings(config: Arc<ConfigStore>, settings: &LifecycleConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(LifecycleTables::default()),
            bridge: AsyncBridge::new(settings),
        }
    }

    /// The configuration store handed to every plugin.
    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// The async lifecycle bridge.
    pub fn bridge(&self) -> &AsyncBridge {
        &self.bridge
    }

    /// Registers a default-constructed plugin of type `P`.
    pub fn register<P: Plugin + Default>(&self, init: bool) -> PluginResult<Arc<dyn Plugin>> {
        self.register_plugin(P::default(), init)
    }

    /// Registers a plugin instance.
    ///
    /// The first registration of a name runs `on_registration` and records
    /// the plugin as a candidate for its extension point. Registering the
    /// same name again with the same type returns the registered instance;
    /// with a different type it fails with
    /// [`PluginError::DuplicatePluginDefinition`]. With `init` the plugin is
    /// initialized immediately.
    pub fn register_plugin<P: Plugin>(&self, plugin: P, init: bool) -> PluginResult<Arc<dyn Plugin>> {
        let name = plugin.name();

        let existing = {
            let tables = self.tables.lock();
            match tables.plugins.get(&name) {
                Some(entry) if entry.type_id != TypeId::of::<P>() => {
                    return Err(PluginError::DuplicatePluginDefinition {
                        name,
                        existing: entry.type_name,
                        requested: std::any::type_name::<P>(),
                    });
                }
                Some(entry) => Some(entry.plugin.clone()),
                None => None,
            }
        };

        let registered = match existing {
            Some(registered) => registered,
            None => {
                let extension_point = plugin.extension_point(&self.config);
                debug!(
                    plugin = %name,
                    extension_point = %extension_point,
                    "Registering plugin"
                );
                plugin.on_registration(&self.config);

                let registered: Arc<dyn Plugin> = Arc::new(plugin);
                let mut tables = self.tables.lock();
                tables.extensions.add_candidate(&extension_point, &name);
                tables.plugins.insert(
                    &name,
                    PluginEntry::new::<P>(registered.clone(), extension_point),
                );
                registered
            }
        };

        if init {
            self.initialize_plugin(&name, &[], false, self.bridge.auto_enabled())?;
        }

        Ok(registered)
    }

    /// Registers a lazy function-backed plugin for an extension point.
    ///
    /// The plugin is named `SetExtension|<extension_point>|`.
    pub fn set_extension<I, S>(
        &self,
        extension_point: &str,
        dependencies: Vec<String>,
        init_fn: I,
        shutdown_fn: Option<S>,
    ) -> PluginResult<Arc<dyn Plugin>>
    where
        I: Fn(&PluginContext<'_>) -> anyhow::Result<Extension> + Send + Sync + 'static,
        S: Fn(&Extension) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let plugin = FnPlugin::new(extension_point, dependencies, init_fn, shutdown_fn);
        self.register_plugin(plugin, false)
    }

    /// Returns the value of an extension point.
    ///
    /// A committed value is returned as is. Otherwise the first enabled
    /// candidate is initialized immediately, even if it is lazy.
    pub fn get_extension(&self, extension_point: &str) -> PluginResult<Extension> {
        let name = self
            .resolve_candidate(extension_point)
            .ok_or_else(|| PluginError::UnknownExtensionPoint(extension_point.to_string()))?;

        let value = self.initialize_plugin(&name, &[], true, self.bridge.auto_enabled())?;
        Ok(value.unwrap_or_default())
    }

    /// Registers `P` (initializing it) and returns the value of its
    /// extension point.
    pub fn get_extension_of<P: Plugin + Default>(&self) -> PluginResult<Extension> {
        let plugin = self.register::<P>(true)?;
        let extension_point = plugin.extension_point(&self.config);
        self.get_extension(&extension_point)
    }

    /// Returns every multi-mode implementation of an extension point keyed
    /// by plugin name, initializing any that are still pending.
    pub fn get_extensions(&self, extension_point: &str) -> PluginResult<BTreeMap<String, Extension>> {
        let candidates: Vec<(String, Arc<dyn Plugin>)> = {
            let tables = self.tables.lock();
            tables
                .extensions
                .candidates(extension_point)
                .iter()
                .filter_map(|name| {
                    tables
                        .plugins
                        .get(name)
                        .map(|entry| (name.clone(), entry.plugin.clone()))
                })
                .collect()
        };

        let mut values = BTreeMap::new();
        for (name, plugin) in candidates {
            if !plugin.is_multi_extension(&self.config) {
                continue;
            }
            let value = self.initialize_plugin(&name, &[], true, self.bridge.auto_enabled())?;
            values.insert(name, value.unwrap_or_default());
        }
        Ok(values)
    }

    /// Registers `P` (initializing it) and collects its extension point.
    pub fn get_extensions_of<P: Plugin + Default>(&self) -> PluginResult<BTreeMap<String, Extension>> {
        let plugin = self.register::<P>(true)?;
        let extension_point = plugin.extension_point(&self.config);
        self.get_extensions(&extension_point)
    }

    /// Snapshot of registered plugins in registration order.
    pub fn list(&self) -> Vec<PluginInfo> {
        self.tables.lock().plugins.list()
    }

    /// Lifecycle state of a plugin.
    pub fn state(&self, name: &str) -> Option<LifecycleState> {
        self.tables.lock().plugins.get(name).map(|e| e.state)
    }

    /// Plugin names in the order they were collected.
    pub fn startup_order(&self) -> Vec<String> {
        self.tables.lock().startup_order.clone()
    }

    /// The plugin that would serve an extension point.
    ///
    /// A committed plugin wins; otherwise the first registered candidate
    /// whose `is_enabled` holds. Conflicts are not detected here.
    pub fn resolve_candidate(&self, extension_point: &str) -> Option<String> {
        let candidates: Vec<(String, Arc<dyn Plugin>)> = {
            let tables = self.tables.lock();
            if let Some(name) = tables.extensions.committed(extension_point) {
                return Some(name.to_string());
            }
            tables
                .extensions
                .candidates(extension_point)
                .iter()
                .filter_map(|name| {
                    tables
                        .plugins
                        .get(name)
                        .map(|entry| (name.clone(), entry.plugin.clone()))
                })
                .collect()
        };

        candidates
            .into_iter()
            .find(|(_, plugin)| plugin.is_enabled(&self.config))
            .map(|(name, _)| name)
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.lock();
        f.debug_struct("PluginManager")
            .field("plugins", &tables.plugins.names())
            .field("startup_order", &tables.startup_order)
            .field("bridge", &self.bridge)
            .finish()
    }
}
