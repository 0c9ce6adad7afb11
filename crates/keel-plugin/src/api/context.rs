//! Plugin context: what a plugin can reach during `initialize` and
//! `shutdown`.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::ConfigStore;

use crate::error::PluginResult;
use crate::extension::Extension;
use crate::manager::PluginManager;

/// Context passed to [`Plugin::initialize`](crate::Plugin::initialize) and
/// [`Plugin::shutdown`](crate::Plugin::shutdown).
///
/// Gives access to the configuration store and lets a plugin pull the
/// extensions it depends on.
#[derive(Clone, Copy)]
pub struct PluginContext<'a> {
    manager: &'a PluginManager,
    plugin: &'a str,
    extension_point: &'a str,
}

impl<'a> PluginContext<'a> {
    pub(crate) fn new(manager: &'a PluginManager, plugin: &'a str, extension_point: &'a str) -> Self {
        Self {
            manager,
            plugin,
            extension_point,
        }
    }

    /// The configuration store shared by every plugin.
    pub fn config(&self) -> &Arc<ConfigStore> {
        self.manager.config()
    }

    /// Name of the plugin being called.
    pub fn plugin_name(&self) -> &str {
        self.plugin
    }

    /// Extension point of the plugin being called.
    pub fn extension_point(&self) -> &str {
        self.extension_point
    }

    /// Resolves another extension point, initializing it if necessary.
    pub fn get_extension(&self, extension_point: &str) -> PluginResult<Extension> {
        self.manager.get_extension(extension_point)
    }

    /// Collects every implementation of a multi-mode extension point.
    pub fn get_extensions(&self, extension_point: &str) -> PluginResult<BTreeMap<String, Extension>> {
        self.manager.get_extensions(extension_point)
    }
}

impl std::fmt::Debug for PluginContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("plugin", &self.plugin)
            .field("extension_point", &self.extension_point)
            .finish()
    }
}
