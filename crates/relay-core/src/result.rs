//! Convenience result type alias for TaskRelay.

use crate::error::AppError;

/// A specialized `Result` type for TaskRelay operations.
pub type AppResult<T> = Result<T, AppError>;
