//! Prelude for convenient imports.

pub use async_trait::async_trait;

pub use keel_core::ConfigStore;

pub use crate::api::context::PluginContext;
pub use crate::error::{PluginError, PluginResult};
pub use crate::extension::Extension;
pub use crate::manager::PluginManager;
pub use crate::registry::{LifecycleState, Plugin, PluginInfo};
pub use crate::traits::option_selects;
