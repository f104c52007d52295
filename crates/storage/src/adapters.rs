//! Helpers that drive a [`BufferedUploadStream`] from a reader or a file.

use crate::client::{CompleteResponse, InitiateRequest, StorageClient};
use crate::error::{StorageError, StorageResult};
use crate::stream::BufferedUploadStream;
use spool_core::UploadConfig;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::instrument;

/// Read size used when copying a source into a stream (64 KiB).
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Copy `reader` into `stream`, close it, and return the completion result.
///
/// The source does not need to be seekable. An empty source still produces a
/// zero-length object.
///
/// # Errors
///
/// If reading or writing fails, the stream is cancelled and closed, which
/// aborts the multipart upload, and the original error is returned.
/// Cancelling the stream stops the copy with [`StorageError::Cancelled`]
/// and aborts the same way. Returns [`StorageError::State`] if the stream
/// closed without completing.
pub async fn upload_reader<R>(
    mut stream: BufferedUploadStream,
    mut reader: R,
) -> StorageResult<CompleteResponse>
where
    R: AsyncRead + Unpin + Send,
{
    let completion = Arc::new(OnceLock::new());
    let captured = Arc::clone(&completion);
    stream.on_completed(move |response| {
        let _ = captured.set(response.clone());
    });

    if let Err(err) = copy_into(&stream, &mut reader).await {
        tracing::warn!(
            bucket = stream.bucket(),
            key = stream.key(),
            error = %err,
            "upload copy failed, aborting"
        );
        stream.cancel();
        if let Err(close_err) = stream.close().await {
            tracing::warn!(error = %close_err, "failed to abort multipart upload");
        }
        return Err(err);
    }

    stream.close().await?;

    completion
        .get()
        .cloned()
        .ok_or_else(|| StorageError::State("transfer was not completed".to_string()))
}

async fn copy_into<R>(stream: &BufferedUploadStream, reader: &mut R) -> StorageResult<u64>
where
    R: AsyncRead + Unpin + Send,
{
    let mut chunk = vec![0u8; COPY_CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        if stream.is_cancellation_requested() {
            return Err(StorageError::Cancelled { operation: "upload" });
        }
        // A source that never yields (an idle stdin) must not hold off cancellation.
        let n = tokio::select! {
            biased;
            _ = stream.cancelled() => {
                return Err(StorageError::Cancelled { operation: "upload" });
            }
            read = reader.read(&mut chunk) => read?,
        };
        if n == 0 {
            break;
        }
        stream.write(&chunk[..n]).await?;
        total += n as u64;
    }
    if total == 0 {
        // Initiate so an empty source still completes.
        stream.write(&[]).await?;
    }
    Ok(total)
}

/// Upload the file at `path` to `bucket`/`key` with default limits.
pub async fn upload_file(
    client: Arc<dyn StorageClient>,
    path: impl AsRef<Path>,
    bucket: impl Into<String>,
    key: impl Into<String>,
) -> StorageResult<CompleteResponse> {
    upload_file_with_request(
        client,
        path,
        InitiateRequest::new(bucket, key),
        UploadConfig::default(),
    )
    .await
}

/// Upload the file at `path` into `bucket`, keyed by the file name.
///
/// # Errors
///
/// Returns [`StorageError::Validation`] if `path` has no UTF-8 file name.
pub async fn upload_file_to_bucket(
    client: Arc<dyn StorageClient>,
    path: impl AsRef<Path>,
    bucket: impl Into<String>,
) -> StorageResult<CompleteResponse> {
    let path = path.as_ref();
    let key = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            StorageError::Validation(format!("path has no file name: {}", path.display()))
        })?
        .to_string();
    upload_file(client, path, bucket, key).await
}

/// Upload the file at `path` using a full initiate request and explicit limits.
#[instrument(skip_all, fields(path = %path.as_ref().display(), key = %request.key))]
pub async fn upload_file_with_request(
    client: Arc<dyn StorageClient>,
    path: impl AsRef<Path>,
    request: InitiateRequest,
    config: UploadConfig,
) -> StorageResult<CompleteResponse> {
    let stream = BufferedUploadStream::with_request(client, request, config)?;
    let file = tokio::fs::File::open(path.as_ref()).await?;
    upload_reader(stream, file).await
}
