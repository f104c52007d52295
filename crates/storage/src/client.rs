//! Storage client capability and multipart upload request/response model.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use spool_core::PartTag;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback receiving byte-level progress for a single part request.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Server-side encryption applied to an object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum EncryptionMethod {
    /// Stored without server-side encryption.
    #[default]
    None,
    /// SSE-S3 (`AES256`).
    Aes256,
    /// SSE-KMS (`aws:kms`).
    AwsKms,
    /// Dual-layer SSE-KMS (`aws:kms:dsse`).
    AwsKmsDsse,
    /// A method this client does not know by name.
    Other(String),
}

impl EncryptionMethod {
    /// Parse the wire name used by S3. Empty input means no encryption.
    pub fn parse(value: &str) -> Self {
        match value {
            "" => Self::None,
            "AES256" => Self::Aes256,
            "aws:kms" => Self::AwsKms,
            "aws:kms:dsse" => Self::AwsKmsDsse,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire name used by S3, or `None` when unencrypted.
    pub fn as_wire(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Aes256 => Some("AES256"),
            Self::AwsKms => Some("aws:kms"),
            Self::AwsKmsDsse => Some("aws:kms:dsse"),
            Self::Other(name) => Some(name),
        }
    }

    /// Whether parts are encrypted, which requires the final part to be
    /// explicitly flagged.
    pub fn is_encrypting(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for EncryptionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire().unwrap_or("none"))
    }
}

/// Checksum algorithm requested for the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Crc32,
    Crc32c,
    Crc64Nvme,
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Wire name used by S3.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Crc32 => "CRC32",
            Self::Crc32c => "CRC32C",
            Self::Crc64Nvme => "CRC64NVME",
            Self::Sha1 => "SHA1",
            Self::Sha256 => "SHA256",
        }
    }

    /// Parse a case-insensitive algorithm name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "CRC32" => Some(Self::Crc32),
            "CRC32C" => Some(Self::Crc32c),
            "CRC64NVME" => Some(Self::Crc64Nvme),
            "SHA1" => Some(Self::Sha1),
            "SHA256" => Some(Self::Sha256),
            _ => None,
        }
    }
}

/// Parameters for starting a multipart upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitiateRequest {
    pub bucket: String,
    pub key: String,
    pub content_type: Option<String>,
    /// User metadata stored with the object.
    pub metadata: BTreeMap<String, String>,
    pub server_side_encryption: EncryptionMethod,
    /// KMS key used when `server_side_encryption` is a KMS method.
    pub sse_kms_key_id: Option<String>,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

impl InitiateRequest {
    /// Create a request with no options for the given object.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(name.into(), value.into());
        self
    }

    pub fn with_encryption(mut self, method: EncryptionMethod) -> Self {
        self.server_side_encryption = method;
        self
    }

    pub fn with_kms_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.sse_kms_key_id = Some(key_id.into());
        self
    }

    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = Some(algorithm);
        self
    }
}

/// Result of starting a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitiateResponse {
    /// Upload id assigned by the storage service.
    pub upload_id: String,
    pub bucket: String,
    pub key: String,
    /// Encryption the service will apply to the parts.
    pub encryption: EncryptionMethod,
}

/// A single part to upload.
#[derive(Clone, Debug)]
pub struct UploadPartRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub part_number: i32,
    pub part_size: usize,
    /// Exactly `part_size` bytes.
    pub body: Bytes,
    pub is_last_part: bool,
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
}

/// Acknowledgement of an uploaded part.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadPartResponse {
    pub part_number: i32,
    pub e_tag: String,
}

/// Parameters for completing a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompleteRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    /// Part tags in ascending part-number order.
    pub parts: Vec<PartTag>,
}

/// Result of completing a multipart upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompleteResponse {
    pub bucket: String,
    pub key: String,
    pub e_tag: Option<String>,
    pub location: Option<String>,
    pub version_id: Option<String>,
}

/// Parameters for aborting a multipart upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AbortRequest {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// Result of aborting a multipart upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AbortResponse {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
}

/// Byte-level progress of a part request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
}

/// Multipart upload capability of an object storage service.
///
/// Implementations must not retry on behalf of the caller beyond what the
/// underlying SDK already does; failures are returned as
/// [`StorageError::Transport`](crate::StorageError::Transport).
#[async_trait]
pub trait StorageClient: Send + Sync + 'static {
    /// Start a multipart upload.
    async fn initiate_multipart_upload(
        &self,
        request: &InitiateRequest,
    ) -> StorageResult<InitiateResponse>;

    /// Upload one part.
    ///
    /// # Arguments
    ///
    /// * `request` - The part to send
    /// * `progress` - Optional callback for byte-level progress of this part
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        progress: Option<ProgressCallback>,
    ) -> StorageResult<UploadPartResponse>;

    /// Complete a multipart upload from its ordered part tags.
    async fn complete_multipart_upload(
        &self,
        request: CompleteRequest,
    ) -> StorageResult<CompleteResponse>;

    /// Abort a multipart upload, discarding its parts.
    async fn abort_multipart_upload(&self, request: AbortRequest) -> StorageResult<AbortResponse>;

    /// Get the name of this storage client, for logging.
    fn backend_name(&self) -> &'static str;
}
