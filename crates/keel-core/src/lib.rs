//! # keel-core
//!
//! Core crate for Keel. Contains the unified error system, the layered
//! configuration store that every plugin reads from, type-coercion
//! functions, strategy loading, and the runtime settings schema.
//!
//! This crate has **no** internal dependencies on other Keel crates.

pub mod config;
pub mod error;
pub mod result;

pub use config::store::ConfigStore;
pub use error::AppError;
pub use result::AppResult;
