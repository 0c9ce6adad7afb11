//! Extension values and the extension point registry.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The opaque value a plugin produces from `initialize`.
///
/// Cheap to clone; lazily collected plugins hold an empty extension until
/// they are forced to initialize.
#[derive(Clone, Default)]
pub struct Extension(Option<Arc<dyn Any + Send + Sync>>);

impl Extension {
    /// Wraps a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Some(Arc::new(value)))
    }

    /// Wraps an already shared value.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self(Some(value))
    }

    /// An extension carrying no value.
    pub fn empty() -> Self {
        Self(None)
    }

    /// Whether a value is present.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Returns the value if it is a `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone()?.downcast::<T>().ok()
    }

    /// Borrows the value if it is a `T`.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.as_deref()?.downcast_ref::<T>()
    }
}

impl fmt::Debug for Extension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(_) => f.write_str("Extension(<value>)"),
            None => f.write_str("Extension(<empty>)"),
        }
    }
}

/// Which plugins are candidates for, and which have committed to, each
/// extension point.
///
/// Values live with the plugin entries; this registry only tracks names.
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    /// Extension point → candidate plugin names in registration order.
    candidates: HashMap<String, Vec<String>>,
    /// Single-mode extension point → committed plugin name.
    single: HashMap<String, String>,
    /// Multi-mode extension point → committed plugin names in commit order.
    multi: HashMap<String, Vec<String>>,
}

impl ExtensionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a plugin as a candidate for an extension point.
    pub fn add_candidate(&mut self, extension_point: &str, plugin: &str) {
        let names = self.candidates.entry(extension_point.to_string()).or_default();
        if !names.iter().any(|n| n == plugin) {
            names.push(plugin.to_string());
        }
    }

    /// Candidate plugin names for an extension point.
    pub fn candidates(&self, extension_point: &str) -> &[String] {
        self.candidates
            .get(extension_point)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The plugin holding a single-mode extension point.
    pub fn committed(&self, extension_point: &str) -> Option<&str> {
        self.single.get(extension_point).map(String::as_str)
    }

    /// Plugins committed to a multi-mode extension point.
    pub fn committed_multi(&self, extension_point: &str) -> &[String] {
        self.multi
            .get(extension_point)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Commits a plugin to a single-mode extension point.
    pub fn commit_single(&mut self, extension_point: &str, plugin: &str) {
        self.single
            .insert(extension_point.to_string(), plugin.to_string());
    }

    /// Commits a plugin to a multi-mode extension point.
    pub fn commit_multi(&mut self, extension_point: &str, plugin: &str) {
        let names = self.multi.entry(extension_point.to_string()).or_default();
        if !names.iter().any(|n| n == plugin) {
            names.push(plugin.to_string());
        }
    }
}
