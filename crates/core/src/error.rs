//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid send threshold: {threshold} (must be at least {min})")]
    InvalidSendThreshold { threshold: usize, min: usize },

    #[error("invalid buffer capacity: {capacity} (must be at least the send threshold {threshold})")]
    InvalidBufferCapacity { capacity: usize, threshold: usize },

    #[error("invalid lock timeout: must be greater than zero")]
    InvalidLockTimeout,

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
