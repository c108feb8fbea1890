//! Centralized error types for the keyward workspace.

use thiserror::Error;

/// Top-level error enum. Absence of data is never an error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeywardError {
    /// The backing store could not be reached. Not retried internally.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type KeywardResult<T> = Result<T, KeywardError>;
