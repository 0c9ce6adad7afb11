//! The layered configuration store.
//!
//! A [`ConfigStore`] resolves a key by scanning its tiers in a fixed order:
//! the process environment, a local overlay written by [`ConfigStore::set`],
//! any number of extra [`Source`]s, and a fallback-defaults map populated by
//! registering accessors. The first tier containing the key wins. The order
//! is chosen once at construction through [`EnvPlacement`].
//!
//! Every store is single-writer during bootstrap; the internal locks only
//! make it shareable with the async lifecycle bridge.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::source::{ProcessEnv, Source};
use super::type_fns::TypeFn;
use crate::result::AppResult;

/// Where the environment tier sits in the resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvPlacement {
    /// Environment → local → extra sources → defaults.
    #[default]
    Top,
    /// Local → extra sources → defaults → environment.
    Bottom,
    /// Local → extra sources → environment → defaults.
    BottomAboveDefaults,
    /// Local → extra sources → defaults. The environment is never consulted.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Environment,
    Local,
    Extra,
    Defaults,
}

impl EnvPlacement {
    fn tiers(self) -> &'static [Tier] {
        use Tier::*;
        match self {
            Self::Top => &[Environment, Local, Extra, Defaults],
            Self::Bottom => &[Local, Extra, Defaults, Environment],
            Self::BottomAboveDefaults => &[Local, Extra, Environment, Defaults],
            Self::Ignored => &[Local, Extra, Defaults],
        }
    }
}

/// Options for a registering read through [`ConfigStore::environ_with`].
#[derive(Clone, Default)]
pub struct Lookup {
    default: Option<Value>,
    type_fn: Option<TypeFn>,
}

impl Lookup {
    /// Creates an empty lookup.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a durable fallback default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Registers a durable type function.
    pub fn type_fn(mut self, type_fn: TypeFn) -> Self {
        self.type_fn = Some(type_fn);
        self
    }
}

impl fmt::Debug for Lookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lookup")
            .field("default", &self.default)
            .field("type_fn", &self.type_fn.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Shaping of the keys returned by [`ConfigStore::get_by_prefix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixOptions {
    /// Strip `prefix + sep` from the resulting keys.
    pub drop_prefix: bool,
    /// Lower-case the prefix before matching.
    pub prefix_lower: bool,
    /// Lower-case the resulting keys.
    pub key_lower: bool,
}

impl Default for PrefixOptions {
    fn default() -> Self {
        Self {
            drop_prefix: true,
            prefix_lower: false,
            key_lower: true,
        }
    }
}

/// Whether a key follows the reserved `=|...|` convention for internal
/// bookkeeping keys.
pub fn is_internal_key(key: &str) -> bool {
    key.len() >= 4 && key.starts_with("=|") && key.ends_with('|')
}

/// Layered key/value resolver with durable defaults and per-key coercion.
pub struct ConfigStore {
    placement: EnvPlacement,
    environment: Arc<dyn Source>,
    local: RwLock<HashMap<String, Value>>,
    sources: RwLock<Vec<Arc<dyn Source>>>,
    defaults: RwLock<HashMap<String, Value>>,
    type_fns: RwLock<HashMap<String, TypeFn>>,
    keys: RwLock<BTreeSet<String>>,
}

/// Builder for [`ConfigStore`].
#[derive(Debug, Default)]
pub struct ConfigStoreBuilder {
    placement: EnvPlacement,
    environment: Option<Arc<dyn Source>>,
    sources: Vec<Arc<dyn Source>>,
}

impl ConfigStoreBuilder {
    /// Sets the environment placement policy.
    pub fn placement(mut self, placement: EnvPlacement) -> Self {
        self.placement = placement;
        self
    }

    /// Replaces the process environment with another source.
    pub fn environment(mut self, environment: impl Source + 'static) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Adds an extra source, ranked after the ones already added.
    pub fn source(mut self, source: impl Source + 'static) -> Self {
        self.sources.push(Arc::new(source));
        self
    }

    /// Builds the store.
    pub fn build(self) -> ConfigStore {
        let store = ConfigStore {
            placement: self.placement,
            environment: self.environment.unwrap_or_else(|| Arc::new(ProcessEnv)),
            local: RwLock::new(HashMap::new()),
            sources: RwLock::new(Vec::new()),
            defaults: RwLock::new(HashMap::new()),
            type_fns: RwLock::new(HashMap::new()),
            keys: RwLock::new(BTreeSet::new()),
        };
        for source in self.sources {
            store.add_source_arc(source);
        }
        store
    }
}

impl ConfigStore {
    /// Creates an environment-first store over the process environment.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Creates a store over the process environment with the given placement.
    pub fn with_placement(placement: EnvPlacement) -> Self {
        Self::builder().placement(placement).build()
    }

    /// Returns a builder.
    pub fn builder() -> ConfigStoreBuilder {
        ConfigStoreBuilder::default()
    }

    /// Returns the placement policy chosen at construction.
    pub fn placement(&self) -> EnvPlacement {
        self.placement
    }

    // ── Reads ──

    /// Resolves a key, applying its registered type function.
    ///
    /// The key is remembered as known even when nothing matches.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.keys.write().insert(key.to_string());
        self.resolve(key)
    }

    /// Resolves a key, returning `default` when nothing matches.
    ///
    /// Unlike [`ConfigStore::environ_or`] the default is not registered.
    pub fn get_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.get(key).unwrap_or_else(|| default.into())
    }

    /// Reads only the local overlay. Does not mark the key as known.
    pub fn get_local(&self, key: &str) -> Option<Value> {
        let raw = self.local.read().get(key).cloned()?;
        self.coerce(key, raw)
    }

    /// Resolves a key and deserializes it into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> AppResult<Option<T>> {
        match self.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Registering read with no default and no type function.
    pub fn environ(&self, key: &str) -> Option<Value> {
        self.environ_with(key, Lookup::new())
    }

    /// Registering read that durably installs `default` as the fallback.
    pub fn environ_or(&self, key: &str, default: impl Into<Value>) -> Value {
        self.environ_with(key, Lookup::new().default_value(default))
            .unwrap_or(Value::Null)
    }

    /// Registering read. A default in `lookup` goes into the fallback tier
    /// and a type function is applied to every future read of `key`.
    pub fn environ_with(&self, key: &str, lookup: Lookup) -> Option<Value> {
        self.set_type_default(key, lookup.default, lookup.type_fn);
        self.get(key)
    }

    /// Whether the key is known or present in a consulted environment.
    pub fn contains(&self, key: &str) -> bool {
        if self.keys.read().contains(key) {
            return true;
        }
        self.placement != EnvPlacement::Ignored
            && lookup_in(self.environment.as_ref(), key).is_some()
    }

    /// A copy of the known keys.
    pub fn keys(&self) -> BTreeSet<String> {
        self.keys.read().clone()
    }

    // ── Writes ──

    /// Writes into the local overlay and marks the key known.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        self.local.write().insert(key.to_string(), value.into());
        self.keys.write().insert(key.to_string());
    }

    /// Writes many pairs into the local overlay.
    pub fn update<I, K, V>(&self, values: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (k, v) in values {
            let key: String = k.into();
            self.set(&key, v);
        }
    }

    /// Registers a type function for a key.
    pub fn set_type_fn(&self, key: &str, type_fn: TypeFn) {
        self.type_fns.write().insert(key.to_string(), type_fn);
    }

    /// Registers a fallback default for a key.
    pub fn set_default(&self, key: &str, default: impl Into<Value>) {
        self.defaults.write().insert(key.to_string(), default.into());
    }

    /// Registers a fallback default and/or a type function for a key.
    pub fn set_type_default(&self, key: &str, default: Option<Value>, type_fn: Option<TypeFn>) {
        if let Some(default) = default {
            self.defaults.write().insert(key.to_string(), default);
        }
        if let Some(type_fn) = type_fn {
            self.type_fns.write().insert(key.to_string(), type_fn);
        }
    }

    /// Returns the local value for `key`, storing `value_fn()` first if absent.
    pub fn get_or_set(&self, key: &str, value_fn: impl FnOnce() -> Value) -> Value {
        let value = self
            .local
            .write()
            .entry(key.to_string())
            .or_insert_with(value_fn)
            .clone();
        self.keys.write().insert(key.to_string());
        value
    }

    /// Returns the default for `key`, registering `value_fn()` first if absent.
    pub fn get_or_set_default(&self, key: &str, value_fn: impl FnOnce() -> Value) -> Value {
        let mut defaults = self.defaults.write();
        defaults.entry(key.to_string()).or_insert_with(value_fn).clone()
    }

    /// Adds a source immediately before the fallback-defaults tier.
    ///
    /// Enumerable keys of the source become known keys.
    pub fn add_source(&self, source: impl Source + 'static) {
        self.add_source_arc(Arc::new(source));
    }

    /// Adds a shared source; see [`ConfigStore::add_source`].
    pub fn add_source_arc(&self, source: Arc<dyn Source>) {
        self.keys.write().extend(source.keys());
        self.sources.write().push(source);
    }

    // ── Prefix scoped ──

    /// Known keys starting with `prefix + sep`, resolved.
    pub fn get_by_prefix(
        &self,
        prefix: &str,
        sep: &str,
        options: PrefixOptions,
    ) -> BTreeMap<String, Value> {
        let effective = if options.prefix_lower {
            prefix.to_lowercase()
        } else {
            prefix.to_string()
        };
        let needle = format!("{effective}{sep}");

        let matching: Vec<String> = self
            .keys
            .read()
            .iter()
            .filter(|k| k.starts_with(&needle))
            .cloned()
            .collect();

        matching
            .into_iter()
            .map(|k| {
                let value = self.resolve(&k).unwrap_or(Value::Null);
                let mut out = if options.drop_prefix {
                    k[needle.len()..].to_string()
                } else {
                    k
                };
                if options.key_lower {
                    out = out.to_lowercase();
                }
                (out, value)
            })
            .collect()
    }

    /// Registers every environment variable named `prefix + sep + ...` and
    /// returns them through [`ConfigStore::get_by_prefix`].
    pub fn import_from_env_by_prefix(
        &self,
        prefix: &str,
        sep: &str,
        options: PrefixOptions,
    ) -> BTreeMap<String, Value> {
        let needle = format!("{prefix}{sep}");
        for key in self.environment.keys() {
            if key.starts_with(&needle) {
                self.environ(&key);
            }
        }
        self.get_by_prefix(prefix, sep, options)
    }

    /// Registers matching entries of `source` as fallback defaults and
    /// returns them through [`ConfigStore::get_by_prefix`].
    ///
    /// Higher tiers (environment, local) still override these values.
    pub fn import_from_map_by_prefix(
        &self,
        prefix: &str,
        source: &BTreeMap<String, Value>,
        sep: &str,
        options: PrefixOptions,
    ) -> BTreeMap<String, Value> {
        let needle = format!("{prefix}{sep}");
        for (key, value) in source {
            if key.starts_with(&needle) {
                self.environ_or(key, value.clone());
            }
        }
        self.get_by_prefix(prefix, sep, options)
    }

    /// Every known key with its resolved value (null when unresolved).
    pub fn export_all(&self, exclude_internal: bool) -> BTreeMap<String, Value> {
        let keys = self.keys();
        keys.into_iter()
            .filter(|k| !(exclude_internal && is_internal_key(k)))
            .map(|k| {
                let value = self.resolve(&k).unwrap_or(Value::Null);
                (k, value)
            })
            .collect()
    }

    // ── Internals ──

    fn resolve(&self, key: &str) -> Option<Value> {
        let raw = self.resolve_raw(key)?;
        self.coerce(key, raw)
    }

    fn resolve_raw(&self, key: &str) -> Option<Value> {
        for tier in self.placement.tiers() {
            let hit = match tier {
                Tier::Environment => lookup_in(self.environment.as_ref(), key),
                Tier::Local => self.local.read().get(key).cloned(),
                Tier::Extra => {
                    let sources = self.sources.read().clone();
                    sources.iter().find_map(|s| lookup_in(s.as_ref(), key))
                }
                Tier::Defaults => self.defaults.read().get(key).cloned(),
            };
            if hit.is_some() {
                return hit;
            }
        }
        None
    }

    fn coerce(&self, key: &str, raw: Value) -> Option<Value> {
        let type_fn = self.type_fns.read().get(key).cloned();
        match type_fn {
            None => Some(raw),
            Some(f) => match f(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Type function rejected configured value");
                    None
                }
            },
        }
    }
}

fn lookup_in(source: &dyn Source, key: &str) -> Option<Value> {
    match source.lookup(key) {
        Ok(value) => value,
        Err(e) => {
            debug!(key = %key, source = ?source, error = %e, "Source lookup failed; treating as not found");
            None
        }
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("placement", &self.placement)
            .field("sources", &self.sources.read().len())
            .field("known_keys", &self.keys.read().len())
            .finish()
    }
}

/// A store can back another store, e.g. a tenant store layered over the
/// process-wide one. Reads through this path do not register keys.
impl Source for ConfigStore {
    fn lookup(&self, key: &str) -> AppResult<Option<Value>> {
        Ok(self.resolve(key))
    }

    fn keys(&self) -> Vec<String> {
        ConfigStore::keys(self).into_iter().collect()
    }
}
