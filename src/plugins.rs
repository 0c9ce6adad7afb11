//! Built-in plugins registered by the `keel` binary.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::config::{Lookup, type_fns};
use keel_plugin::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info};

/// Extension point of [`Heartbeat`].
pub const HEARTBEAT: &str = "heartbeat";

/// Extension point of the greeting set through `set_extension`.
pub const GREETING: &str = "greeting";

/// Stop switch shared between the heartbeat task and `async_stopping`.
#[derive(Debug)]
pub struct HeartbeatHandle {
    interval: Duration,
    stop: watch::Sender<bool>,
}

impl HeartbeatHandle {
    /// Configured tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Logs a heartbeat on the async runtime while the process runs.
///
/// Reads `HEARTBEAT_SECONDS` (default 5) and is disabled by
/// `HEARTBEAT_ENABLED=false`.
#[derive(Debug, Default)]
pub struct Heartbeat;

#[async_trait]
impl Plugin for Heartbeat {
    fn name(&self) -> String {
        HEARTBEAT.to_string()
    }

    fn is_enabled(&self, config: &ConfigStore) -> bool {
        config
            .environ_with(
                "HEARTBEAT_ENABLED",
                Lookup::new().default_value(true).type_fn(type_fns::boolean()),
            )
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    fn initialize(&self, ctx: &PluginContext<'_>) -> anyhow::Result<Extension> {
        let seconds = ctx
            .config()
            .environ_with(
                "HEARTBEAT_SECONDS",
                Lookup::new().default_value(5).type_fn(type_fns::integer()),
            )
            .and_then(|v| v.as_u64())
            .filter(|s| *s > 0)
            .ok_or_else(|| anyhow::anyhow!("HEARTBEAT_SECONDS must be a positive integer"))?;

        let (stop, _) = watch::channel(false);
        Ok(Extension::new(HeartbeatHandle {
            interval: Duration::from_secs(seconds),
            stop,
        }))
    }

    async fn async_ready(&self, _config: Arc<ConfigStore>, value: Extension) -> anyhow::Result<()> {
        let handle = value
            .downcast::<HeartbeatHandle>()
            .ok_or_else(|| anyhow::anyhow!("heartbeat extension has the wrong type"))?;
        let mut stop = handle.stop.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(handle.interval);
            let mut beats: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        beats += 1;
                        debug!(beats, "Heartbeat");
                    }
                    _ = stop.changed() => break,
                }
            }
            info!(beats, "Heartbeat stopped");
        });

        Ok(())
    }

    async fn async_stopping(
        &self,
        _config: Arc<ConfigStore>,
        value: Extension,
    ) -> anyhow::Result<()> {
        if let Some(handle) = value.downcast::<HeartbeatHandle>() {
            handle.stop.send_replace(true);
        }
        Ok(())
    }
}

/// Registers the built-in plugins.
pub fn register_builtin(manager: &PluginManager) -> PluginResult<()> {
    manager.register::<Heartbeat>(false)?;

    manager.set_extension(
        GREETING,
        Vec::new(),
        |ctx: &PluginContext<'_>| -> anyhow::Result<Extension> {
            let name = ctx.config().environ_or("APP_NAME", "keel");
            let name = name.as_str().unwrap_or("keel");
            let greeting = match ctx.get_extension(HEARTBEAT) {
                Ok(heartbeat) => match heartbeat.downcast_ref::<HeartbeatHandle>() {
                    Some(handle) => format!(
                        "{name} is up, heartbeat every {}s",
                        handle.interval().as_secs()
                    ),
                    None => format!("{name} is up"),
                },
                Err(_) => format!("{name} is up, heartbeat off"),
            };
            Ok(Extension::new(greeting))
        },
        None::<fn(&Extension) -> anyhow::Result<()>>,
    )?;

    Ok(())
}
