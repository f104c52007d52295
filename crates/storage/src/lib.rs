//! Buffered multipart uploads to S3-compatible object storage.
//!
//! This crate provides:
//! - A write-only stream that uploads its bytes as multipart upload parts
//! - A timeout-bounded async lock serializing every stream operation
//! - Adapters that upload a reader or a file through a stream
//! - The storage client capability and its S3 implementation

pub mod adapters;
pub mod backends;
pub mod client;
pub mod error;
pub mod events;
pub mod lock;
pub mod stream;

pub use adapters::{upload_file, upload_file_to_bucket, upload_file_with_request, upload_reader};
pub use backends::s3::S3StorageClient;
pub use client::{
    AbortRequest, AbortResponse, ChecksumAlgorithm, CompleteRequest, CompleteResponse,
    EncryptionMethod, InitiateRequest, InitiateResponse, ProgressCallback, StorageClient,
    TransferProgress, UploadPartRequest, UploadPartResponse,
};
pub use error::{StorageError, StorageResult};
pub use events::UploadEvents;
pub use lock::{AsyncMutex, DEFAULT_LOCK_TIMEOUT};
pub use stream::{BufferedUploadStream, CancelHandle};

use spool_core::S3Config;
use std::sync::Arc;

/// Create a storage client from configuration.
pub fn from_config(config: &S3Config) -> StorageResult<Arc<dyn StorageClient>> {
    let client = S3StorageClient::from_config(config)?;
    Ok(Arc::new(client))
}
