//! Plugin-facing API.

pub mod context;
