//! Keel: plugin lifecycle host
//!
//! Main entry point: loads runtime settings, builds the application
//! configuration store, and drives the plugin lifecycle around the
//! process's lifetime.

mod plugins;

use std::sync::{Arc, OnceLock};

use tracing_subscriber::{EnvFilter, fmt};

use keel_core::ConfigStore;
use keel_core::config::{FileSource, RuntimeConfig};
use keel_core::error::AppError;
use keel_plugin::PluginManager;

/// The process-wide plugin manager, created once by `run`.
static PLUGIN_MANAGER: OnceLock<Arc<PluginManager>> = OnceLock::new();

#[tokio::main]
async fn main() {
    let config = match load_configuration() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config).await {
        tracing::error!("Keel error: {}", e);
        std::process::exit(1);
    }
}

/// Load runtime settings from file and environment
fn load_configuration() -> Result<RuntimeConfig, AppError> {
    let config_path = std::env::var("KEEL_CONFIG").unwrap_or_else(|_| "config/keel".to_string());
    RuntimeConfig::load(&config_path)
}

/// Initialize tracing/logging
fn init_logging(config: &RuntimeConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(true)
                .init();
        }
        _ => {
            fmt()
                .pretty()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

/// Build the application store: environment per the configured placement,
/// then each configured file.
fn build_store(config: &RuntimeConfig) -> Result<ConfigStore, AppError> {
    let store = ConfigStore::with_placement(config.env_placement);
    for path in &config.var_files {
        tracing::info!("Layering variables from '{}'", path);
        store.add_source(FileSource::load(path)?);
    }
    Ok(store)
}

/// Main run function
async fn run(config: RuntimeConfig) -> Result<(), AppError> {
    tracing::info!("Starting Keel v{}", env!("CARGO_PKG_VERSION"));

    // ── Step 1: Configuration store ──────────────────────────────
    let store = Arc::new(build_store(&config)?);

    // ── Step 2: Plugin manager ───────────────────────────────────
    let manager = PLUGIN_MANAGER
        .get_or_init(|| Arc::new(PluginManager::with_settings(store, &config.lifecycle)))
        .clone();
    manager.bridge().capture_context();

    // ── Step 3: Register and initialize plugins ──────────────────
    plugins::register_builtin(&manager)?;
    manager.init_all()?;

    for info in manager.list() {
        tracing::info!(
            plugin = %info.name,
            extension_point = %info.extension_point,
            state = ?info.state,
            "Plugin registered"
        );
    }

    let greeting = manager.get_extension(plugins::GREETING)?;
    if let Some(greeting) = greeting.downcast_ref::<String>() {
        tracing::info!("{}", greeting);
    }

    // ── Step 4: Async ready ──────────────────────────────────────
    manager.async_ready(false).await;

    // ── Step 5: Wait for shutdown ────────────────────────────────
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping plugins...");

    // ── Step 6: Async stopping + shutdown ────────────────────────
    manager.async_stopping().await;
    manager.shutdown_all();

    tracing::info!("Keel stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
