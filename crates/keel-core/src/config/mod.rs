//! Configuration: the layered [`ConfigStore`](store::ConfigStore) that
//! plugins read from, and the runtime settings schema for the bootstrap
//! binary.
//!
//! Runtime settings are deserialized via the `config` crate from an optional
//! TOML file overlaid with `KEEL__`-prefixed environment variables.

pub mod lifecycle;
pub mod logging;
pub mod source;
pub mod store;
pub mod strategy;
pub mod type_fns;

use serde::{Deserialize, Serialize};

pub use serde_json::Value;

pub use self::lifecycle::LifecycleConfig;
pub use self::logging::LoggingConfig;
pub use self::source::{FileSource, MapSource, ProcessEnv, Source};
pub use self::store::{ConfigStore, EnvPlacement, Lookup, PrefixOptions, is_internal_key};
pub use self::strategy::{LoadedStrategy, StrategyCatalog, load_strategy};
pub use self::type_fns::TypeFn;

use crate::error::AppError;

/// Root runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Plugin lifecycle settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Placement of the environment tier in the application store.
    #[serde(default)]
    pub env_placement: EnvPlacement,
    /// Files layered into the application store as extra sources, highest
    /// priority first.
    #[serde(default)]
    pub var_files: Vec<String>,
}

impl RuntimeConfig {
    /// Load runtime settings.
    ///
    /// Reads `path` when it exists, then environment variables such as
    /// `KEEL__LOGGING__LEVEL=debug`.
    pub fn load(path: &str) -> Result<Self, AppError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("KEEL")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to build config: {e}")))?;

        config
            .try_deserialize()
            .map_err(|e| AppError::configuration(format!("Failed to deserialize config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_toml_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("keel.toml");
        std::fs::write(
            &path,
            "env_placement = \"bottom\"\n\n[logging]\nlevel = \"debug\"\n\n[lifecycle]\nasync_timeout_seconds = 5\n",
        )
        .expect("write");

        let config = RuntimeConfig::load(path.to_str().expect("utf-8 path")).expect("load");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.lifecycle.async_timeout_seconds, 5);
        assert!(config.lifecycle.async_auto);
        assert_eq!(config.env_placement, EnvPlacement::Bottom);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = RuntimeConfig::load("/nonexistent/keel").expect("load");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.env_placement, EnvPlacement::Top);
        assert!(config.var_files.is_empty());
    }
}
