//! Configuration types shared across crates.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Buffering and locking limits for a buffered upload stream.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Write buffer capacity in bytes (default: 15 MiB).
    /// Must be at least `min_send_threshold`.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    /// Minimum number of buffered bytes before a part is sent (default: 5 MiB).
    /// S3 rejects non-final parts smaller than 5 MiB, so lower values are refused.
    #[serde(default = "default_min_send_threshold")]
    pub min_send_threshold: usize,
    /// How long an operation waits for the stream lock, in milliseconds (default: 60000).
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_buffer_capacity() -> usize {
    crate::DEFAULT_BUFFER_CAPACITY
}

fn default_min_send_threshold() -> usize {
    crate::DEFAULT_MIN_SEND_THRESHOLD
}

fn default_lock_timeout_ms() -> u64 {
    crate::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            min_send_threshold: default_min_send_threshold(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl UploadConfig {
    /// Get the lock timeout as a Duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Validate part sizing and lock timeout.
    pub fn validate(&self) -> Result<()> {
        if self.min_send_threshold < crate::MIN_PART_SIZE {
            return Err(Error::InvalidSendThreshold {
                threshold: self.min_send_threshold,
                min: crate::MIN_PART_SIZE,
            });
        }
        if self.buffer_capacity < self.min_send_threshold {
            return Err(Error::InvalidBufferCapacity {
                capacity: self.buffer_capacity,
                threshold: self.min_send_threshold,
            });
        }
        if self.lock_timeout_ms == 0 {
            return Err(Error::InvalidLockTimeout);
        }
        Ok(())
    }
}

/// S3-compatible storage configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct S3Config {
    /// Default bucket name, used when a command does not name one.
    pub bucket: Option<String>,
    /// Optional endpoint URL (for MinIO, etc.).
    pub endpoint: Option<String>,
    /// AWS region.
    pub region: Option<String>,
    /// AWS access key ID. Falls back to the default credential chain if not set.
    /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
    pub access_key_id: Option<String>,
    /// AWS secret access key. Falls back to the default credential chain if not set.
    /// WARNING: Prefer env vars or IAM roles over storing secrets in config files.
    pub secret_access_key: Option<String>,
    /// Force path-style URLs (`endpoint/bucket/key` instead of `bucket.endpoint/key`).
    /// Required for MinIO and some S3-compatible services.
    #[serde(default)]
    pub force_path_style: bool,
}

impl S3Config {
    /// Validate S3 configuration invariants.
    pub fn validate(&self) -> Result<()> {
        match (
            self.access_key_id.as_ref(),
            self.secret_access_key.as_ref(),
        ) {
            (Some(_), Some(_)) | (None, None) => Ok(()),
            _ => Err(Error::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            )),
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// S3 connection settings.
    #[serde(default)]
    pub s3: S3Config,
    /// Upload stream limits.
    #[serde(default)]
    pub upload: UploadConfig,
}

impl AppConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.s3.validate()?;
        self.upload.validate()
    }
}
