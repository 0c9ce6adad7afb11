//! Plugin lifecycle errors.
//!
//! Every variant is a programming or configuration error. They propagate to
//! the caller of `register`, `get_extension`, or `init_all` and are never
//! caught inside the lifecycle. Failures of `shutdown` and the async hooks
//! are logged instead and never reach this type.

use keel_core::error::{AppError, ErrorKind};
use thiserror::Error;

/// Errors raised while registering, resolving, or initializing plugins.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Initialization was requested for a name that was never registered.
    #[error("unable to find plugin: {0}")]
    PluginNotFound(String),

    /// No registered candidate can serve the extension point.
    #[error("unknown extension point: {0}")]
    UnknownExtensionPoint(String),

    /// A dependency chain revisited an extension point still being resolved.
    #[error(
        "circular dependency \"{dependency}\" encountered while initializing {plugin}; chain={chain:?}"
    )]
    CircularDependency {
        /// The plugin whose dependency closed the cycle.
        plugin: String,
        /// The extension point that was revisited.
        dependency: String,
        /// Extension points being resolved, outermost first.
        chain: Vec<String>,
    },

    /// Two single-mode plugins claimed the same extension point.
    #[error(
        "duplicated hit on extension point \"{extension_point}\"; write attempted by {plugin} but already taken by {existing}"
    )]
    DuplicateExtensionPoint {
        /// The contested extension point.
        extension_point: String,
        /// The plugin attempting to commit.
        plugin: String,
        /// The plugin already holding the extension point.
        existing: String,
    },

    /// One plugin name registered with two different implementations.
    #[error("duplicate plugin name with different implementation: {name}, {existing} vs {requested}")]
    DuplicatePluginDefinition {
        /// The plugin name.
        name: String,
        /// Type name of the registered implementation.
        existing: &'static str,
        /// Type name of the rejected implementation.
        requested: &'static str,
    },

    /// The plugin's own `initialize` failed.
    #[error("plugin {plugin} failed to initialize: {source}")]
    Initialization {
        /// The failing plugin.
        plugin: String,
        /// The error returned by `initialize`.
        #[source]
        source: anyhow::Error,
    },
}

/// A specialized `Result` for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;

impl From<PluginError> for AppError {
    fn from(err: PluginError) -> Self {
        let kind = match &err {
            PluginError::PluginNotFound(_) | PluginError::UnknownExtensionPoint(_) => {
                ErrorKind::NotFound
            }
            PluginError::DuplicateExtensionPoint { .. }
            | PluginError::DuplicatePluginDefinition { .. } => ErrorKind::Conflict,
            PluginError::CircularDependency { .. } | PluginError::Initialization { .. } => {
                ErrorKind::Plugin
            }
        };
        AppError::with_source(kind, err.to_string(), err)
    }
}
