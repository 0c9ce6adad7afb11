//! Lifecycle driver: recursive initialization, `init_all` and
//! `shutdown_all`.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::api::context::PluginContext;
use crate::error::{PluginError, PluginResult};
use crate::extension::Extension;
use crate::manager::PluginManager;
use crate::registry::{LifecycleState, Plugin};

impl PluginManager {
    /// Initializes a registered plugin by name.
    ///
    /// With `force_now` a lazy plugin produces its value immediately.
    /// Returns `None` when the plugin is neither enabled nor multi-mode.
    pub fn initialize(&self, name: &str, force_now: bool) -> PluginResult<Option<Extension>> {
        self.initialize_plugin(name, &[], force_now, self.bridge.auto_enabled())
    }

    /// Recursive initialization.
    ///
    /// `requested_by` holds the extension points currently being resolved,
    /// outermost first.
    pub(crate) fn initialize_plugin(
        &self,
        name: &str,
        requested_by: &[String],
        force_now: bool,
        auto_async: bool,
    ) -> PluginResult<Option<Extension>> {
        let (plugin, extension_point, state, value) = {
            let tables = self.tables.lock();
            let entry = tables
                .plugins
                .get(name)
                .ok_or_else(|| PluginError::PluginNotFound(name.to_string()))?;
            (
                entry.plugin.clone(),
                entry.extension_point.clone(),
                entry.state,
                entry.value.clone(),
            )
        };

        match state {
            LifecycleState::Registered => {}
            LifecycleState::Initializing => {
                return Err(self.reentry_error(&extension_point));
            }
            LifecycleState::Collected if force_now => {
                let value = self.run_initialize(name, &plugin, &extension_point, auto_async)?;
                return Ok(Some(value));
            }
            _ => return Ok(Some(value)),
        }

        let config = self.config();
        let multi = plugin.is_multi_extension(config);
        if !multi && !plugin.is_enabled(config) {
            debug!(plugin = %name, extension_point = %extension_point, "Plugin is not enabled");
            return Ok(None);
        }

        // Dependencies
        let mut chain = requested_by.to_vec();
        chain.push(extension_point.clone());
        for dependency in plugin.dependencies(config) {
            if chain.contains(&dependency) {
                return Err(PluginError::CircularDependency {
                    plugin: name.to_string(),
                    dependency,
                    chain,
                });
            }
            let owner = self
                .resolve_candidate(&dependency)
                .ok_or_else(|| PluginError::UnknownExtensionPoint(dependency.clone()))?;
            self.initialize_plugin(&owner, &chain, false, auto_async)?;
        }

        // Collect
        {
            let mut tables = self.tables.lock();
            if !multi {
                if let Some(existing) = tables.extensions.committed(&extension_point) {
                    if existing != name {
                        return Err(PluginError::DuplicateExtensionPoint {
                            extension_point,
                            plugin: name.to_string(),
                            existing: existing.to_string(),
                        });
                    }
                }
            }
            if let Some(entry) = tables.plugins.get_mut(name) {
                entry.state = LifecycleState::Collected;
            }
        }

        // Initialize
        let value = if plugin.eager() || force_now {
            match self.run_initialize(name, &plugin, &extension_point, auto_async) {
                Ok(value) => value,
                Err(e) => {
                    if let Some(entry) = self.tables.lock().plugins.get_mut(name) {
                        entry.state = LifecycleState::Registered;
                    }
                    return Err(e);
                }
            }
        } else {
            debug!(plugin = %name, extension_point = %extension_point, "Plugin collected lazily");
            Extension::empty()
        };

        // Commit
        {
            let mut tables = self.tables.lock();
            if multi {
                tables.extensions.commit_multi(&extension_point, name);
            } else {
                tables.extensions.commit_single(&extension_point, name);
            }
            tables.startup_order.push(name.to_string());
        }

        Ok(Some(value))
    }

    /// Calls `initialize` and stores the produced value.
    ///
    /// The plugin is `Initializing` for the duration of the call and falls
    /// back to `Collected` if it fails.
    fn run_initialize(
        &self,
        name: &str,
        plugin: &Arc<dyn Plugin>,
        extension_point: &str,
        auto_async: bool,
    ) -> PluginResult<Extension> {
        {
            let mut tables = self.tables.lock();
            if let Some(entry) = tables.plugins.get_mut(name) {
                entry.state = LifecycleState::Initializing;
            }
            tables
                .in_progress
                .push((name.to_string(), extension_point.to_string()));
        }

        let result = {
            let span = info_span!("plugin", plugin = %name, extension_point = %extension_point);
            let _guard = span.enter();

            let ctx = PluginContext::new(self, name, extension_point);
            plugin.initialize(&ctx)
        };

        let value = {
            let mut tables = self.tables.lock();
            if let Some(pos) = tables.in_progress.iter().rposition(|(n, _)| n == name) {
                tables.in_progress.remove(pos);
            }
            let entry = tables.plugins.get_mut(name);
            match result {
                Ok(value) => {
                    if let Some(entry) = entry {
                        entry.state = LifecycleState::Initialized;
                        entry.value = value.clone();
                    }
                    value
                }
                Err(source) => {
                    if let Some(entry) = entry {
                        entry.state = LifecycleState::Collected;
                    }
                    return Err(PluginError::Initialization {
                        plugin: name.to_string(),
                        source,
                    });
                }
            }
        };

        info!(plugin = %name, extension_point = %extension_point, "Plugin initialized");

        if auto_async {
            self.auto_async_ready(name);
        }

        Ok(value)
    }

    /// A plugin was asked for while its own `initialize` is still running.
    fn reentry_error(&self, extension_point: &str) -> PluginError {
        let tables = self.tables.lock();
        let plugin = tables
            .in_progress
            .last()
            .map(|(plugin, _)| plugin.clone())
            .unwrap_or_default();
        let chain = tables
            .in_progress
            .iter()
            .map(|(_, point)| point.clone())
            .collect();
        PluginError::CircularDependency {
            plugin,
            dependency: extension_point.to_string(),
            chain,
        }
    }

    /// Initializes every registered plugin in registration order.
    pub fn init_all(&self) -> PluginResult<()> {
        self.init_all_with_async(self.bridge.auto_enabled())
    }

    /// Like [`init_all`](Self::init_all) with the automatic async bridge
    /// switched on or off for this call.
    pub fn init_all_with_async(&self, auto_async: bool) -> PluginResult<()> {
        let names = self.tables.lock().plugins.names().to_vec();
        for name in &names {
            self.initialize_plugin(name, &[], false, auto_async)?;
        }

        info!(plugins = names.len(), "All plugins initialized");

        Ok(())
    }

    /// Shuts down every initialized plugin in reverse startup order.
    ///
    /// A failing `shutdown` is logged and the remaining plugins still shut
    /// down.
    pub fn shutdown_all(&self) {
        self.shutdown_all_with_async(self.bridge.auto_enabled());
    }

    /// Like [`shutdown_all`](Self::shutdown_all) with the automatic async
    /// bridge switched on or off for this call.
    pub fn shutdown_all_with_async(&self, auto_async: bool) {
        let order = self.startup_order();

        for name in order.iter().rev() {
            let Some((plugin, extension_point, value)) = self.claim_shutdown(name) else {
                continue;
            };

            if auto_async {
                self.auto_async_stopping(name);
            }

            let span = info_span!("plugin", plugin = %name, extension_point = %extension_point);
            let _guard = span.enter();

            let ctx = PluginContext::new(self, name, &extension_point);
            match plugin.shutdown(&ctx, &value) {
                Ok(()) => debug!("Plugin shut down"),
                Err(e) => warn!(error = %e, "Plugin shutdown returned error"),
            }
        }

        info!(plugins = order.len(), "All plugins shut down");
    }

    /// Marks an initialized plugin as shut down and returns what its
    /// `shutdown` needs.
    fn claim_shutdown(&self, name: &str) -> Option<(Arc<dyn Plugin>, String, Extension)> {
        let mut tables = self.tables.lock();
        let entry = tables.plugins.get_mut(name)?;
        if entry.state != LifecycleState::Initialized {
            return None;
        }
        entry.state = LifecycleState::ShutDown;
        Some((
            entry.plugin.clone(),
            entry.extension_point.clone(),
            entry.value.clone(),
        ))
    }
}
