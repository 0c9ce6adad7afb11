//! Convenience result type alias for Keel.

use crate::error::AppError;

/// A specialized `Result` type for Keel operations.
pub type AppResult<T> = Result<T, AppError>;
