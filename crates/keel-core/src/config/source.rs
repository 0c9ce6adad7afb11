//! Lookup sources consulted by [`ConfigStore`](super::store::ConfigStore).
//!
//! A source is a read-only key → value lookup. The store never writes into a
//! source; writes go to its local overlay.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::error::AppError;
use crate::result::AppResult;

/// A key → value lookup tier.
pub trait Source: Send + Sync + fmt::Debug {
    /// Looks up a key.
    ///
    /// `Ok(None)` means the key is absent. An `Err` is treated by the store
    /// as "not found" for this source only.
    fn lookup(&self, key: &str) -> AppResult<Option<Value>>;

    /// Keys this source can enumerate. Absorbed into the store's known keys
    /// when the source is added.
    fn keys(&self) -> Vec<String> {
        Vec::new()
    }
}

/// The process environment, matched by upper-cased key.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl Source for ProcessEnv {
    fn lookup(&self, key: &str) -> AppResult<Option<Value>> {
        match std::env::var(key.to_uppercase()) {
            Ok(value) => Ok(Some(Value::String(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(AppError::with_source(
                crate::error::ErrorKind::Configuration,
                format!("environment variable '{}' is not valid unicode", key.to_uppercase()),
                e,
            )),
        }
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars_os()
            .filter_map(|(k, _)| k.into_string().ok())
            .collect()
    }
}

/// An in-memory map source.
///
/// With [`MapSource::uppercase_keys`] it behaves like an environment and is
/// what tests inject in place of [`ProcessEnv`].
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    values: HashMap<String, Value>,
    uppercase: bool,
}

impl MapSource {
    /// Creates a map source matched by exact key.
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            uppercase: false,
        }
    }

    /// Creates a map source matched by upper-cased key, like the environment.
    pub fn uppercase_keys<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.into().to_uppercase(), v.into()))
                .collect(),
            uppercase: true,
        }
    }
}

impl<K, V> FromIterator<(K, V)> for MapSource
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Source for MapSource {
    fn lookup(&self, key: &str) -> AppResult<Option<Value>> {
        let value = if self.uppercase {
            self.values.get(&key.to_uppercase())
        } else {
            self.values.get(key)
        };
        Ok(value.cloned())
    }

    fn keys(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }
}

/// Values read from a configuration file (TOML, JSON, YAML, ...).
///
/// Only top-level keys are exposed; nested tables come back as objects.
#[derive(Debug, Clone)]
pub struct FileSource {
    inner: MapSource,
}

impl FileSource {
    /// Loads a file; the format is taken from the extension.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let values: HashMap<String, Value> = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| {
                AppError::configuration(format!(
                    "Failed to read config source '{}': {e}",
                    path.display()
                ))
            })?
            .try_deserialize()?;

        tracing::debug!(path = %path.display(), keys = values.len(), "Loaded file source");

        Ok(Self {
            inner: MapSource::new(values),
        })
    }
}

impl Source for FileSource {
    fn lookup(&self, key: &str) -> AppResult<Option<Value>> {
        self.inner.lookup(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uppercase_map_source_matches_any_case() {
        let source = MapSource::uppercase_keys([("widget_rate", "9")]);
        assert_eq!(source.lookup("widget_rate").unwrap(), Some(Value::from("9")));
        assert_eq!(source.lookup("WIDGET_RATE").unwrap(), Some(Value::from("9")));
        assert_eq!(source.lookup("missing").unwrap(), None);
    }

    #[test]
    fn test_exact_map_source_is_case_sensitive() {
        let source: MapSource = [("name", "keel")].into_iter().collect();
        assert_eq!(source.lookup("name").unwrap(), Some(Value::from("keel")));
        assert_eq!(source.lookup("NAME").unwrap(), None);
    }

    #[test]
    fn test_file_source_reads_toml() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "app_name = \"demo\"\nworkers = 4\n").expect("write");

        let source = FileSource::load(&path).expect("load");
        assert_eq!(source.lookup("app_name").unwrap(), Some(Value::from("demo")));
        assert_eq!(source.lookup("workers").unwrap(), Some(Value::from(4)));

        let mut keys = source.keys();
        keys.sort();
        assert_eq!(keys, vec!["app_name".to_string(), "workers".to_string()]);
    }

    #[test]
    fn test_file_source_missing_file_is_configuration_error() {
        let err = FileSource::load("/nonexistent/keel.toml").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Configuration);
    }
}
