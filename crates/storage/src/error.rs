//! Storage error types.

use std::time::Duration;
use thiserror::Error;

/// Upload stream and storage client errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("invalid upload state: {0}")]
    State(String),

    #[error("unable to lock upload context within {timeout:?}")]
    LockTimeout { timeout: Duration },

    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    #[error("storage transport error: {0}")]
    Transport(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("operation not supported by a write-only upload stream: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Create a transport error from any storage failure.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(err))
    }

    /// Check whether this error reports an observed cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Check whether this error reports an invalid lifecycle state,
    /// including a lock that could not be acquired in time.
    pub fn is_state_error(&self) -> bool {
        matches!(self, Self::State(_) | Self::LockTimeout { .. })
    }
}

impl From<spool_core::Error> for StorageError {
    fn from(err: spool_core::Error) -> Self {
        match err {
            spool_core::Error::Config(msg) => Self::Config(msg),
            other => Self::Validation(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
