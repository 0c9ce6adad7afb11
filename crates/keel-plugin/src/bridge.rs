//! Async lifecycle bridge.
//!
//! Synchronous `initialize`/`shutdown` never suspend. The optional
//! `async_ready`/`async_stopping` hooks run on a captured tokio runtime,
//! either driven explicitly (awaited, in startup order) or scheduled
//! automatically as each plugin initializes or shuts down:
//!
//! - On the thread that captured the runtime the hook is spawned
//!   fire-and-forget.
//! - From any other thread, including runtime workers and blocking-pool
//!   threads, the hook is submitted to the captured runtime and the caller
//!   blocks until it finishes or the timeout elapses.
//!
//! A per-plugin flag is claimed before a hook is scheduled, so whichever
//! path runs first wins and a hook never fires twice.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use futures::FutureExt;
use keel_core::ConfigStore;
use keel_core::config::LifecycleConfig;
use parking_lot::Mutex;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

use crate::extension::Extension;
use crate::manager::PluginManager;
use crate::registry::{LifecycleState, Plugin};

/// Which async hook is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncHook {
    /// `Plugin::async_ready`.
    Ready,
    /// `Plugin::async_stopping`.
    Stopping,
}

impl fmt::Display for AsyncHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => write!(f, "async_ready"),
            Self::Stopping => write!(f, "async_stopping"),
        }
    }
}

/// The runtime captured by [`AsyncBridge::capture_context`].
#[derive(Debug, Clone)]
struct CapturedContext {
    handle: Handle,
    thread: ThreadId,
}

/// Holds the captured runtime handle and the auto-mode switch.
pub struct AsyncBridge {
    context: Mutex<Option<CapturedContext>>,
    auto_enabled: AtomicBool,
    capture_once: bool,
    timeout: Option<Duration>,
}

impl AsyncBridge {
    /// Creates a bridge with no captured context.
    pub fn new(settings: &LifecycleConfig) -> Self {
        Self {
            context: Mutex::new(None),
            auto_enabled: AtomicBool::new(settings.async_auto),
            capture_once: settings.capture_once,
            timeout: settings.async_timeout(),
        }
    }

    /// Records the current tokio runtime and thread.
    ///
    /// Returns `None` outside a runtime. Calling again refreshes the
    /// reference unless the bridge was configured to capture once.
    pub fn capture_context(&self) -> Option<Handle> {
        let mut context = self.context.lock();
        if self.capture_once {
            if let Some(existing) = context.as_ref() {
                return Some(existing.handle.clone());
            }
        }

        let handle = Handle::try_current().ok()?;
        debug!(thread = ?thread::current().id(), "Captured async context");
        *context = Some(CapturedContext {
            handle: handle.clone(),
            thread: thread::current().id(),
        });
        Some(handle)
    }

    /// The captured runtime handle, if any.
    pub fn captured(&self) -> Option<Handle> {
        self.context.lock().as_ref().map(|c| c.handle.clone())
    }

    /// Forgets the captured runtime.
    pub fn clear_context(&self) {
        *self.context.lock() = None;
    }

    /// Whether hooks are scheduled automatically.
    pub fn auto_enabled(&self) -> bool {
        self.auto_enabled.load(Ordering::SeqCst)
    }

    /// Switches automatic scheduling on or off.
    pub fn set_auto_enabled(&self, enabled: bool) {
        self.auto_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Default wait bound for cross-thread dispatch.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Runs `fut` on the captured runtime.
    ///
    /// Returns `false` when nothing is captured, the runtime is gone, or a
    /// blocking wait timed out.
    pub(crate) fn dispatch<F>(&self, fut: F, timeout: Option<Duration>) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Some(context) = self.context.lock().clone() else {
            return false;
        };

        let (tx, rx) = mpsc::channel();
        context.handle.spawn(async move {
            fut.await;
            let _ = tx.send(());
        });

        // On the captured thread the runtime can only make progress once the
        // caller returns, so the hook is left to run in the background.
        if thread::current().id() == context.thread {
            return match rx.try_recv() {
                Err(mpsc::TryRecvError::Disconnected) => {
                    warn!("Async context is no longer running");
                    false
                }
                _ => true,
            };
        }

        debug!(captured_thread = ?context.thread, "Waiting on captured async context");
        let wait = || match timeout {
            Some(timeout) => rx.recv_timeout(timeout),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        let received = match Handle::try_current() {
            Ok(current) if current.runtime_flavor() == RuntimeFlavor::MultiThread => {
                tokio::task::block_in_place(wait)
            }
            _ => wait(),
        };

        match received {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?timeout, "Async hook timed out");
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Async context is no longer running");
                false
            }
        }
    }
}

impl fmt::Debug for AsyncBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncBridge")
            .field("captured", &self.context.lock().is_some())
            .field("auto_enabled", &self.auto_enabled())
            .field("capture_once", &self.capture_once)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A hook claimed for one plugin.
struct ClaimedHook {
    name: String,
    plugin: Arc<dyn Plugin>,
    value: Extension,
}

/// Runs claimed hooks one after another; failures and panics are logged.
async fn run_hooks(hook: AsyncHook, config: Arc<ConfigStore>, claimed: Vec<ClaimedHook>) {
    for ClaimedHook { name, plugin, value } in claimed {
        let call = async {
            match hook {
                AsyncHook::Ready => plugin.async_ready(config.clone(), value).await,
                AsyncHook::Stopping => plugin.async_stopping(config.clone(), value).await,
            }
        };

        match std::panic::AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => debug!(plugin = %name, hook = %hook, "Async hook completed"),
            Ok(Err(e)) => warn!(plugin = %name, hook = %hook, error = %e, "Async hook returned error"),
            Err(_) => warn!(plugin = %name, hook = %hook, "Async hook panicked"),
        }
    }
}

impl PluginManager {
    /// Runs `async_ready` for every initialized plugin in startup order.
    ///
    /// With `capture` the current runtime is captured first. Hooks already
    /// run (explicitly or automatically) are skipped.
    pub async fn async_ready(&self, capture: bool) {
        if capture {
            self.bridge.capture_context();
        }
        let claimed = self.claim_hooks(AsyncHook::Ready, None);
        run_hooks(AsyncHook::Ready, self.config().clone(), claimed).await;
    }

    /// Runs `async_stopping` for every initialized plugin in reverse
    /// startup order.
    pub async fn async_stopping(&self) {
        let claimed = self.claim_hooks(AsyncHook::Stopping, None);
        run_hooks(AsyncHook::Stopping, self.config().clone(), claimed).await;
    }

    /// Submits [`async_stopping`](Self::async_stopping) to the captured
    /// runtime from synchronous code.
    ///
    /// Returns `false` when no runtime is captured or it has stopped. From
    /// inside the runtime the hooks are spawned and `true` is returned
    /// immediately.
    pub fn schedule_async_shutdown(&self, timeout: Option<Duration>) -> bool {
        if self.bridge.captured().is_none() {
            debug!("No async context captured; skipping async shutdown");
            return false;
        }
        let claimed = self.claim_hooks(AsyncHook::Stopping, None);
        let fut = run_hooks(AsyncHook::Stopping, self.config().clone(), claimed);
        self.bridge.dispatch(fut, timeout.or(self.bridge.timeout()))
    }

    /// Schedules `async_ready` for one plugin that just initialized.
    pub(crate) fn auto_async_ready(&self, name: &str) {
        self.auto_dispatch(AsyncHook::Ready, name);
    }

    /// Schedules `async_stopping` for one plugin about to shut down.
    pub(crate) fn auto_async_stopping(&self, name: &str) {
        self.auto_dispatch(AsyncHook::Stopping, name);
    }

    fn auto_dispatch(&self, hook: AsyncHook, name: &str) {
        if self.bridge.captured().is_none() {
            return;
        }
        let claimed = self.claim_hooks(hook, Some(name));
        if claimed.is_empty() {
            return;
        }
        let fut = run_hooks(hook, self.config().clone(), claimed);
        self.bridge.dispatch(fut, self.bridge.timeout());
    }

    /// Sets the hook flag of every eligible plugin, or only `only`, and
    /// returns what is needed to run the hooks.
    ///
    /// Ready hooks are claimed in startup order, stopping hooks in reverse.
    fn claim_hooks(&self, hook: AsyncHook, only: Option<&str>) -> Vec<ClaimedHook> {
        let mut tables = self.tables.lock();
        let mut order: Vec<String> = match only {
            Some(name) => vec![name.to_string()],
            None => tables.startup_order.clone(),
        };
        if hook == AsyncHook::Stopping {
            order.reverse();
        }

        let mut claimed = Vec::new();
        for name in order {
            let Some(entry) = tables.plugins.get_mut(&name) else {
                continue;
            };
            // An automatic stopping hook runs just before `shutdown`, after
            // the plugin has been claimed for shutdown.
            let eligible = match (hook, only.is_some()) {
                (_, false) => entry.state == LifecycleState::Initialized,
                (AsyncHook::Ready, true) => entry.state == LifecycleState::Initialized,
                (AsyncHook::Stopping, true) => matches!(
                    entry.state,
                    LifecycleState::Initialized | LifecycleState::ShutDown
                ),
            };
            let flag = match hook {
                AsyncHook::Ready => &mut entry.async_ready_called,
                AsyncHook::Stopping => &mut entry.async_stopping_called,
            };
            if !eligible || *flag {
                continue;
            }
            *flag = true;
            claimed.push(ClaimedHook {
                name,
                plugin: entry.plugin.clone(),
                value: entry.value.clone(),
            });
        }
        claimed
    }
}
