//! # keel-plugin
//!
//! Plugin framework for Keel. Provides:
//!
//! - The `Plugin` trait with overridable capabilities (enabled, multi-mode,
//!   eager, dependencies)
//! - Extension point resolution with dependency ordering, cycle detection,
//!   and conflict detection
//! - Lifecycle management (register, initialize, shutdown in reverse order)
//! - An async bridge running `async_ready`/`async_stopping` hooks on a
//!   captured tokio runtime

pub mod api;
pub mod bridge;
pub mod error;
pub mod extension;
mod lifecycle;
pub mod manager;
pub mod prelude;
pub mod registry;
pub mod traits;

pub use api::context::PluginContext;
pub use bridge::{AsyncBridge, AsyncHook};
pub use error::{PluginError, PluginResult};
pub use extension::{Extension, ExtensionRegistry};
pub use manager::PluginManager;
pub use registry::{LifecycleState, Plugin, PluginInfo};
pub use traits::{FnPlugin, option_selects};
