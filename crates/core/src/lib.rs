//! Core domain types and shared configuration for spool.
//!
//! This crate defines the data model shared by the storage engine and the CLI:
//! - Multipart upload lifecycle state and part tags
//! - Part sizing and locking limits
//! - Upload, S3 and application configuration

pub mod config;
pub mod error;
pub mod upload;

pub use config::{AppConfig, S3Config, UploadConfig};
pub use error::{Error, Result};
pub use upload::{PartTag, UploadState};

/// Minimum part size accepted by S3 for every part but the last: 5 MiB.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Default minimum number of buffered bytes before a part is sent.
pub const DEFAULT_MIN_SEND_THRESHOLD: usize = MIN_PART_SIZE;

/// Default write buffer capacity: 15 MiB.
pub const DEFAULT_BUFFER_CAPACITY: usize = MIN_PART_SIZE * 3;

/// Default lock acquisition timeout in milliseconds (60 seconds).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 60_000;
