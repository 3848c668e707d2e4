//! Result type aliases for the ORT job monitor.

use crate::OrtError;

/// A specialized `Result` type for job monitor operations.
pub type OrtResult<T> = Result<T, OrtError>;
