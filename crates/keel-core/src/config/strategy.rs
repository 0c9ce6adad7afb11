//! Dynamic strategy selection from namespaced configuration.
//!
//! With `WIDGET_TYPE=pkg.MyWidget` and `WIDGET_RATE=9` in the environment,
//! `load_strategy(store, catalog, "WIDGET")` resolves the factory registered
//! as `pkg.MyWidget` and hands back `{"rate": "9"}` as its parameters.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use super::store::{ConfigStore, PrefixOptions};
use crate::result::AppResult;

/// Builds a strategy from its parameter bag.
pub type StrategyFactory<T> = Arc<dyn Fn(&BTreeMap<String, Value>) -> AppResult<T> + Send + Sync>;

/// Named strategy factories for one strategy family.
pub struct StrategyCatalog<T> {
    factories: HashMap<String, StrategyFactory<T>>,
}

impl<T> StrategyCatalog<T> {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registers a factory under a type name.
    pub fn register<F>(&mut self, type_name: &str, factory: F) -> &mut Self
    where
        F: Fn(&BTreeMap<String, Value>) -> AppResult<T> + Send + Sync + 'static,
    {
        self.factories
            .insert(type_name.to_string(), Arc::new(factory));
        self
    }

    /// Looks up a factory.
    pub fn get(&self, type_name: &str) -> Option<StrategyFactory<T>> {
        self.factories.get(type_name).cloned()
    }

    /// Registered type names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl<T> Default for StrategyCatalog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for StrategyCatalog<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyCatalog")
            .field("names", &self.names())
            .finish()
    }
}

/// Outcome of [`load_strategy`].
pub struct LoadedStrategy<T> {
    /// The configured `<PREFIX>_TYPE` value, if any.
    pub type_name: Option<String>,
    /// The matching factory; `None` when unset or unknown.
    pub factory: Option<StrategyFactory<T>>,
    /// Remaining `<PREFIX>_*` values, prefix dropped and keys lower-cased.
    pub params: BTreeMap<String, Value>,
}

impl<T> LoadedStrategy<T> {
    /// Runs the factory against the params.
    pub fn build(&self) -> AppResult<Option<T>> {
        self.factory.as_ref().map(|f| f(&self.params)).transpose()
    }
}

impl<T> fmt::Debug for LoadedStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedStrategy")
            .field("type_name", &self.type_name)
            .field("resolved", &self.factory.is_some())
            .field("params", &self.params)
            .finish()
    }
}

/// Selects a strategy from environment variables sharing `prefix`.
pub fn load_strategy<T>(
    store: &ConfigStore,
    catalog: &StrategyCatalog<T>,
    prefix: &str,
) -> LoadedStrategy<T> {
    let mut params = store.import_from_env_by_prefix(prefix, "_", PrefixOptions::default());
    let type_name = params.remove("type").and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    });

    let factory = match type_name.as_deref() {
        None => {
            error!(prefix = %prefix, "No strategy type configured");
            None
        }
        Some(name) => {
            let factory = catalog.get(name);
            if factory.is_none() {
                error!(prefix = %prefix, strategy = %name, "Unable to load strategy: unknown type");
            }
            factory
        }
    };

    LoadedStrategy {
        type_name,
        factory,
        params,
    }
}
