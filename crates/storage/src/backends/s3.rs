//! S3-compatible storage client using AWS SDK.

use crate::client::{
    AbortRequest, AbortResponse, ChecksumAlgorithm, CompleteRequest, CompleteResponse,
    EncryptionMethod, InitiateRequest, InitiateResponse, ProgressCallback, StorageClient,
    TransferProgress, UploadPartRequest, UploadPartResponse,
};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_sdk_s3::operation::upload_part::UploadPartOutput;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use spool_core::S3Config;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::instrument;

/// Marker included in lazy-credentials initialization errors so we can map them
/// to actionable config errors instead of generic transport failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "spool-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "spool-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root initialization)
/// in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self
            .chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure AWS credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::transport(err)
}

fn sdk_checksum_algorithm(algorithm: ChecksumAlgorithm) -> aws_sdk_s3::types::ChecksumAlgorithm {
    use aws_sdk_s3::types::ChecksumAlgorithm as Sdk;
    match algorithm {
        ChecksumAlgorithm::Crc32 => Sdk::Crc32,
        ChecksumAlgorithm::Crc32c => Sdk::Crc32C,
        ChecksumAlgorithm::Crc64Nvme => Sdk::Crc64Nvme,
        ChecksumAlgorithm::Sha1 => Sdk::Sha1,
        ChecksumAlgorithm::Sha256 => Sdk::Sha256,
    }
}

fn part_checksum(algorithm: ChecksumAlgorithm, output: &UploadPartOutput) -> Option<String> {
    let value = match algorithm {
        ChecksumAlgorithm::Crc32 => output.checksum_crc32(),
        ChecksumAlgorithm::Crc32c => output.checksum_crc32_c(),
        ChecksumAlgorithm::Crc64Nvme => output.checksum_crc64_nvme(),
        ChecksumAlgorithm::Sha1 => output.checksum_sha1(),
        ChecksumAlgorithm::Sha256 => output.checksum_sha256(),
    };
    value.map(str::to_string)
}

fn completed_part(
    part_number: i32,
    e_tag: String,
    checksum: Option<&(ChecksumAlgorithm, String)>,
) -> CompletedPart {
    let builder = CompletedPart::builder().e_tag(e_tag).part_number(part_number);
    let builder = match checksum {
        Some((ChecksumAlgorithm::Crc32, value)) => builder.checksum_crc32(value),
        Some((ChecksumAlgorithm::Crc32c, value)) => builder.checksum_crc32_c(value),
        Some((ChecksumAlgorithm::Crc64Nvme, value)) => builder.checksum_crc64_nvme(value),
        Some((ChecksumAlgorithm::Sha1, value)) => builder.checksum_sha1(value),
        Some((ChecksumAlgorithm::Sha256, value)) => builder.checksum_sha256(value),
        None => builder,
    };
    builder.build()
}

/// Normalize bare `host:port` endpoints (e.g. "minio:9000") to `http://` URLs.
fn normalize_endpoint(endpoint_url: &str) -> String {
    let endpoint_lower = endpoint_url.to_lowercase();
    if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
        endpoint_url.to_string()
    } else {
        format!("http://{}", endpoint_url)
    }
}

type PartChecksums = BTreeMap<i32, (ChecksumAlgorithm, String)>;

/// Multipart upload client for S3-compatible object storage.
pub struct S3StorageClient {
    client: Client,
    /// Normalized endpoint, or the canonical AWS endpoint for the region.
    endpoint: String,
    region: String,
    /// Per-part checksums by upload id, needed again at completion.
    /// Entries are removed only by complete or abort, so an upload that is
    /// never finished keeps its entry for the life of the client.
    part_checksums: Mutex<HashMap<String, PartChecksums>>,
}

impl std::fmt::Debug for S3StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3StorageClient")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3StorageClient {
    /// Create a client from configuration.
    ///
    /// Uses static credentials when both keys are configured, otherwise the
    /// AWS default credential chain, resolved on the first signed request.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] if only one of the access key id and
    /// secret access key is set.
    pub fn from_config(config: &S3Config) -> StorageResult<Self> {
        config.validate()?;

        let resolved_region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let credentials = aws_sdk_s3::config::Credentials::new(
                key_id,
                secret,
                None, // session token
                None, // expiration
                "spool-config",
            );
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = config.endpoint.as_deref().map(normalize_endpoint);
        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // For explicit HTTP endpoints (e.g. local MinIO), use an HTTP-only client
            // so SDK initialization doesn't depend on native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let endpoint = normalized_endpoint
            .unwrap_or_else(|| format!("s3.{}.amazonaws.com", resolved_region));

        Ok(Self {
            client: Client::from_conf(s3_config_builder.build()),
            endpoint,
            region: resolved_region,
            part_checksums: Mutex::new(HashMap::new()),
        })
    }

    /// Wrap an already configured SDK client.
    pub fn from_client(client: Client) -> Self {
        let config = client.config();
        let region = config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| "us-east-1".to_string());
        let endpoint = format!("s3.{}.amazonaws.com", region);
        Self {
            client,
            endpoint,
            region,
            part_checksums: Mutex::new(HashMap::new()),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Underlying SDK client.
    pub fn sdk_client(&self) -> &Client {
        &self.client
    }

    fn record_checksum(
        &self,
        upload_id: &str,
        part_number: i32,
        checksum: (ChecksumAlgorithm, String),
    ) {
        self.part_checksums
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(upload_id.to_string())
            .or_default()
            .insert(part_number, checksum);
    }

    fn take_checksums(&self, upload_id: &str) -> PartChecksums {
        self.part_checksums
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(upload_id)
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageClient for S3StorageClient {
    #[instrument(
        skip(self, request),
        fields(backend = "s3", bucket = %request.bucket, key = %request.key)
    )]
    async fn initiate_multipart_upload(
        &self,
        request: &InitiateRequest,
    ) -> StorageResult<InitiateResponse> {
        let metadata: HashMap<String, String> = request
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let output = self
            .client
            .create_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .set_content_type(request.content_type.clone())
            .set_metadata((!metadata.is_empty()).then_some(metadata))
            .set_server_side_encryption(
                request
                    .server_side_encryption
                    .as_wire()
                    .map(ServerSideEncryption::from),
            )
            .set_ssekms_key_id(request.sse_kms_key_id.clone())
            .set_checksum_algorithm(request.checksum_algorithm.map(sdk_checksum_algorithm))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StorageError::State("S3 did not return upload_id".to_string()))?
            .to_string();
        let encryption = output
            .server_side_encryption()
            .map(|sse| EncryptionMethod::parse(sse.as_str()))
            .unwrap_or_default();

        Ok(InitiateResponse {
            upload_id,
            bucket: output.bucket().unwrap_or(request.bucket.as_str()).to_string(),
            key: output.key().unwrap_or(request.key.as_str()).to_string(),
            encryption,
        })
    }

    #[instrument(
        skip(self, request, progress),
        fields(backend = "s3", part_number = request.part_number, part_size = request.part_size)
    )]
    async fn upload_part(
        &self,
        request: UploadPartRequest,
        progress: Option<ProgressCallback>,
    ) -> StorageResult<UploadPartResponse> {
        let total_bytes = request.part_size as u64;
        if let Some(progress) = &progress {
            progress(TransferProgress {
                bytes_transferred: 0,
                total_bytes,
            });
        }

        let output = self
            .client
            .upload_part()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .part_number(request.part_number)
            .content_length(request.part_size as i64)
            .set_checksum_algorithm(request.checksum_algorithm.map(sdk_checksum_algorithm))
            .body(request.body.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        if let Some(algorithm) = request.checksum_algorithm {
            match part_checksum(algorithm, &output) {
                Some(value) => self.record_checksum(
                    &request.upload_id,
                    request.part_number,
                    (algorithm, value),
                ),
                None => tracing::warn!(
                    part_number = request.part_number,
                    algorithm = algorithm.as_str(),
                    "S3 did not return a part checksum"
                ),
            }
        }

        if let Some(progress) = &progress {
            progress(TransferProgress {
                bytes_transferred: total_bytes,
                total_bytes,
            });
        }

        Ok(UploadPartResponse {
            part_number: request.part_number,
            e_tag: output.e_tag().unwrap_or_default().to_string(),
        })
    }

    #[instrument(skip(self, request), fields(backend = "s3", parts = request.parts.len()))]
    async fn complete_multipart_upload(
        &self,
        request: CompleteRequest,
    ) -> StorageResult<CompleteResponse> {
        let checksums = self.take_checksums(&request.upload_id);
        let parts: Vec<CompletedPart> = request
            .parts
            .into_iter()
            .map(|tag| {
                let checksum = checksums.get(&tag.part_number);
                completed_part(tag.part_number, tag.e_tag, checksum)
            })
            .collect();
        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        let output = self
            .client
            .complete_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(CompleteResponse {
            bucket: output.bucket().unwrap_or(request.bucket.as_str()).to_string(),
            key: output.key().unwrap_or(request.key.as_str()).to_string(),
            e_tag: output.e_tag().map(str::to_string),
            location: output.location().map(str::to_string),
            version_id: output.version_id().map(str::to_string),
        })
    }

    #[instrument(skip(self, request), fields(backend = "s3", upload_id = %request.upload_id))]
    async fn abort_multipart_upload(&self, request: AbortRequest) -> StorageResult<AbortResponse> {
        self.take_checksums(&request.upload_id);

        self.client
            .abort_multipart_upload()
            .bucket(&request.bucket)
            .key(&request.key)
            .upload_id(&request.upload_id)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(AbortResponse {
            bucket: request.bucket,
            key: request.key,
            upload_id: request.upload_id,
        })
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
