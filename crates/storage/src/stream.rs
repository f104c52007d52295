//! Write-only stream that uploads its bytes as an S3 multipart upload.
//!
//! Bytes are accumulated in a fixed-capacity buffer. Once the buffer holds at
//! least the minimum send threshold, it is sent as the next part. Closing the
//! stream sends the remainder as the final part and completes the upload, or
//! aborts it if cancellation was requested.
//!
//! Every stateful operation runs inside a single [`AsyncMutex`] section, so at
//! most one storage call is in flight per stream.

use crate::client::{
    AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, InitiateRequest,
    InitiateResponse, StorageClient, TransferProgress, UploadPartRequest, UploadPartResponse,
};
use crate::error::{StorageError, StorageResult};
use crate::events::UploadEvents;
use crate::lock::AsyncMutex;
use bytes::{Bytes, BytesMut};
use spool_core::{PartTag, UploadConfig, UploadState};
use std::fmt;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Cloneable handle that requests cancellation of a stream.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Mutable upload state, only touched while holding the stream lock.
struct UploadSession {
    state: UploadState,
    request: InitiateRequest,
    initiate_attempted: bool,
    initiated: Option<InitiateResponse>,
    completion: Option<CompleteResponse>,
    abort: Option<AbortResponse>,
    next_part_number: i32,
    part_tags: Vec<PartTag>,
    bytes_uploaded: u64,
    encrypting: bool,
    buffer: BytesMut,
}

/// A buffered, write-only multipart upload.
pub struct BufferedUploadStream {
    client: Arc<dyn StorageClient>,
    session: AsyncMutex<UploadSession>,
    events: UploadEvents,
    cancel: CancellationToken,
    bucket: String,
    key: String,
    buffer_capacity: usize,
    min_send_threshold: usize,
}

impl fmt::Debug for BufferedUploadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedUploadStream")
            .field("backend", &self.client.backend_name())
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("buffer_capacity", &self.buffer_capacity)
            .field("min_send_threshold", &self.min_send_threshold)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl BufferedUploadStream {
    /// Create a stream for `bucket`/`key` with default limits.
    pub fn new(
        client: Arc<dyn StorageClient>,
        bucket: impl Into<String>,
        key: impl Into<String>,
    ) -> StorageResult<Self> {
        Self::with_config(client, bucket, key, UploadConfig::default())
    }

    /// Create a stream for `bucket`/`key` with explicit limits.
    pub fn with_config(
        client: Arc<dyn StorageClient>,
        bucket: impl Into<String>,
        key: impl Into<String>,
        config: UploadConfig,
    ) -> StorageResult<Self> {
        Self::with_request(client, InitiateRequest::new(bucket, key), config)
    }

    /// Create a stream from a full initiate request.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if the send threshold is below
    /// 5 MiB, the buffer capacity is below the send threshold, the lock
    /// timeout is zero, or the bucket or key is empty.
    pub fn with_request(
        client: Arc<dyn StorageClient>,
        request: InitiateRequest,
        config: UploadConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        if request.bucket.is_empty() || request.key.is_empty() {
            return Err(StorageError::Validation(
                "bucket and key must not be empty".to_string(),
            ));
        }
        Self::build(
            client,
            request,
            config.buffer_capacity,
            config.min_send_threshold,
            config.lock_timeout(),
        )
    }

    fn build(
        client: Arc<dyn StorageClient>,
        request: InitiateRequest,
        buffer_capacity: usize,
        min_send_threshold: usize,
        lock_timeout: Duration,
    ) -> StorageResult<Self> {
        let bucket = request.bucket.clone();
        let key = request.key.clone();
        let session = UploadSession {
            state: UploadState::Uninitiated,
            request,
            initiate_attempted: false,
            initiated: None,
            completion: None,
            abort: None,
            next_part_number: 1,
            part_tags: Vec::new(),
            bytes_uploaded: 0,
            encrypting: false,
            // One spare byte for the part held back while encrypting.
            buffer: BytesMut::with_capacity(buffer_capacity + 1),
        };

        Ok(Self {
            client,
            session: AsyncMutex::new(session, lock_timeout)?,
            events: UploadEvents::default(),
            cancel: CancellationToken::new(),
            bucket,
            key,
            buffer_capacity,
            min_send_threshold,
        })
    }

    pub fn on_initiated<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&InitiateResponse) + Send + Sync + 'static,
    {
        self.events.on_initiated(handler);
        self
    }

    pub fn on_uploaded_part<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&UploadPartResponse) + Send + Sync + 'static,
    {
        self.events.on_uploaded_part(handler);
        self
    }

    pub fn on_transfer_progress<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        self.events.on_transfer_progress(handler);
        self
    }

    pub fn on_completed<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&CompleteResponse) + Send + Sync + 'static,
    {
        self.events.on_completed(handler);
        self
    }

    pub fn on_aborted<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&AbortResponse) + Send + Sync + 'static,
    {
        self.events.on_aborted(handler);
        self
    }

    /// Append bytes to the upload.
    ///
    /// The first write initiates the multipart upload. Writes of any length
    /// are accepted; whenever the buffer reaches the send threshold a part is
    /// uploaded before the rest is copied.
    ///
    /// Writing to a cancelled, completed or aborted stream does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] if cancellation is observed while
    /// the data is being copied, [`StorageError::State`] if an earlier
    /// initiation failed, and any storage client error unchanged.
    #[instrument(
        skip(self, data),
        fields(bucket = %self.bucket, key = %self.key, len = data.len())
    )]
    pub async fn write(&self, data: &[u8]) -> StorageResult<()> {
        let mut session = self.session.lock().await?;

        if self.cancel.is_cancelled() || session.state.is_terminal() {
            tracing::debug!(state = %session.state, "ignoring write");
            return Ok(());
        }

        if session.initiated.is_none() {
            self.initiate(&mut session).await?;
        }

        if session.completion.is_some() {
            return Err(StorageError::State(
                "cannot write to a completed upload".to_string(),
            ));
        }

        let limit = self.copy_limit(session.encrypting);
        let mut remaining = data;
        loop {
            if self.cancel.is_cancelled() {
                return Err(StorageError::Cancelled { operation: "write" });
            }
            if session.buffer.len() >= self.min_send_threshold {
                self.flush_part(&mut session, false).await?;
            }
            if remaining.is_empty() {
                return Ok(());
            }

            let room = limit.saturating_sub(session.buffer.len());
            if room == 0 {
                return Err(StorageError::State(
                    "upload buffer is full and could not be flushed".to_string(),
                ));
            }
            let (chunk, rest) = remaining.split_at(room.min(remaining.len()));
            session.buffer.extend_from_slice(chunk);
            remaining = rest;
        }
    }

    /// Upload the buffered bytes as a part if they reach the send threshold.
    pub async fn flush(&self) -> StorageResult<()> {
        let mut session = self.session.lock().await?;
        self.flush_part(&mut session, false).await
    }

    /// Like [`flush`](Self::flush), but `token` firing during the call
    /// cancels this stream.
    pub async fn flush_with_cancellation(&self, token: &CancellationToken) -> StorageResult<()> {
        if token.is_cancelled() {
            self.cancel();
        }

        let external = token.clone();
        let own = self.cancel.clone();
        let watcher = tokio::spawn(async move {
            external.cancelled().await;
            own.cancel();
        });

        let result = self.flush().await;
        watcher.abort();
        result
    }

    /// Upload the remainder as the final part and complete the upload.
    ///
    /// Does nothing if the upload was never initiated or already finished.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Cancelled`] if cancellation was requested.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %self.key))]
    pub async fn complete(&self) -> StorageResult<()> {
        self.session
            .run_exclusive(|mut session| async move { self.complete_locked(&mut session).await })
            .await
    }

    /// Abort the multipart upload, discarding any uploaded parts.
    ///
    /// Does nothing if the upload was never initiated or already finished.
    #[instrument(skip(self), fields(bucket = %self.bucket, key = %self.key))]
    pub async fn abort(&self) -> StorageResult<()> {
        self.session
            .run_exclusive(|mut session| async move { self.abort_locked(&mut session).await })
            .await
    }

    /// Finish the upload: abort if cancellation was requested, otherwise
    /// complete.
    ///
    /// A cancellation observed while completing falls back to aborting.
    /// Any other completion failure is returned.
    pub async fn close(&self) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return self.abort().await;
        }

        match self.complete().await {
            Err(err) if err.is_cancelled() => {
                tracing::info!(
                    bucket = %self.bucket,
                    key = %self.key,
                    "cancelled while completing, aborting upload"
                );
                self.abort().await
            }
            result => result,
        }
    }

    /// Request cancellation. Idempotent.
    ///
    /// In-flight storage calls are not interrupted; further writes and flushes
    /// stop making progress and the next [`close`](Self::close) aborts.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Handle that cancels this stream from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub async fn state(&self) -> StorageResult<UploadState> {
        Ok(self.session.lock().await?.state)
    }

    /// Total bytes acknowledged in uploaded parts.
    pub async fn bytes_uploaded(&self) -> StorageResult<u64> {
        Ok(self.session.lock().await?.bytes_uploaded)
    }

    /// Number of bytes buffered but not yet uploaded.
    pub async fn buffered_len(&self) -> StorageResult<usize> {
        Ok(self.session.lock().await?.buffer.len())
    }

    pub async fn is_encrypting(&self) -> StorageResult<bool> {
        Ok(self.session.lock().await?.encrypting)
    }

    /// Tags of the uploaded parts, in part-number order.
    pub async fn part_tags(&self) -> StorageResult<Vec<PartTag>> {
        Ok(self.session.lock().await?.part_tags.clone())
    }

    pub async fn upload_id(&self) -> StorageResult<Option<String>> {
        let session = self.session.lock().await?;
        Ok(session.initiated.as_ref().map(|r| r.upload_id.clone()))
    }

    /// Result of the completion call, once the upload completed.
    pub async fn completion(&self) -> StorageResult<Option<CompleteResponse>> {
        Ok(self.session.lock().await?.completion.clone())
    }

    /// Result of the abort call, once the upload was aborted.
    pub async fn abort_response(&self) -> StorageResult<Option<AbortResponse>> {
        Ok(self.session.lock().await?.abort.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    pub fn min_send_threshold(&self) -> usize {
        self.min_send_threshold
    }

    pub fn can_read(&self) -> bool {
        false
    }

    pub fn can_seek(&self) -> bool {
        false
    }

    pub fn can_write(&self) -> bool {
        true
    }

    pub fn read(&self, _buf: &mut [u8]) -> StorageResult<usize> {
        Err(StorageError::Unsupported("read"))
    }

    pub fn seek(&self, _pos: SeekFrom) -> StorageResult<u64> {
        Err(StorageError::Unsupported("seek"))
    }

    pub fn set_len(&self, _len: u64) -> StorageResult<()> {
        Err(StorageError::Unsupported("set_len"))
    }

    pub fn position(&self) -> StorageResult<u64> {
        Err(StorageError::Unsupported("position"))
    }

    pub fn set_position(&self, _pos: u64) -> StorageResult<()> {
        Err(StorageError::Unsupported("set_position"))
    }

    fn copy_limit(&self, encrypting: bool) -> usize {
        if encrypting {
            self.buffer_capacity + 1
        } else {
            self.buffer_capacity
        }
    }

    async fn initiate(&self, session: &mut UploadSession) -> StorageResult<()> {
        if session.initiate_attempted {
            return Err(StorageError::State(
                "multipart upload could not be initiated".to_string(),
            ));
        }
        session.initiate_attempted = true;

        let response = self
            .client
            .initiate_multipart_upload(&session.request)
            .await
            .inspect_err(|e| {
                tracing::warn!(error = %e, "failed to initiate multipart upload");
            })?;

        session.encrypting = response.encryption.is_encrypting();
        session.state = UploadState::Uploading;
        tracing::info!(
            backend = self.client.backend_name(),
            upload_id = %response.upload_id,
            encryption = %response.encryption,
            "initiated multipart upload"
        );
        self.events.initiated(&response);
        session.initiated = Some(response);
        Ok(())
    }

    /// Send the buffered bytes as the next part.
    ///
    /// Non-final parts are only sent once they reach the send threshold. While
    /// encrypting, non-final parts hold back the last buffered byte so the
    /// final part is never empty.
    async fn flush_part(
        &self,
        session: &mut UploadSession,
        is_last_part: bool,
    ) -> StorageResult<()> {
        if self.cancel.is_cancelled() || session.state != UploadState::Uploading {
            return Ok(());
        }
        let Some(initiated) = session.initiated.as_ref() else {
            return Ok(());
        };

        let has_data = !session.buffer.is_empty();
        // An empty final part is only sent for a zero-length object.
        if !has_data && (!is_last_part || !session.part_tags.is_empty()) {
            return Ok(());
        }

        let reserved = usize::from(session.encrypting && !is_last_part);
        let part_size = session.buffer.len() - reserved;
        let min_size = if is_last_part { 0 } else { self.min_send_threshold };
        if part_size < min_size {
            return Ok(());
        }

        let part_number = session.next_part_number;
        let request = UploadPartRequest {
            bucket: initiated.bucket.clone(),
            key: initiated.key.clone(),
            upload_id: initiated.upload_id.clone(),
            part_number,
            part_size,
            body: Bytes::copy_from_slice(&session.buffer[..part_size]),
            is_last_part,
            checksum_algorithm: session.request.checksum_algorithm,
        };
        let progress = if has_data {
            self.events.progress_callback()
        } else {
            None
        };

        let response = self
            .client
            .upload_part(request, progress)
            .await
            .inspect_err(|e| {
                tracing::warn!(part_number, error = %e, "failed to upload part");
            })?;
        session.next_part_number += 1;

        if self.cancel.is_cancelled() {
            tracing::warn!(part_number, "cancelled during part upload, part not recorded");
            return Err(StorageError::Cancelled {
                operation: "upload part",
            });
        }

        session
            .part_tags
            .push(PartTag::new(part_number, response.e_tag.clone()));
        session.bytes_uploaded += part_size as u64;
        tracing::debug!(part_number, part_size, is_last_part, "uploaded part");
        self.events.uploaded_part(&response);

        if reserved == 1 {
            let held = session.buffer[part_size];
            session.buffer.clear();
            session.buffer.extend_from_slice(&[held]);
        } else {
            session.buffer.clear();
        }
        Ok(())
    }

    async fn complete_locked(&self, session: &mut UploadSession) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled {
                operation: "complete",
            });
        }
        if session.state != UploadState::Uploading {
            return Ok(());
        }
        let Some(initiated) = session.initiated.clone() else {
            return Ok(());
        };

        self.flush_part(session, true).await?;
        // The final flush is skipped silently if cancelled meanwhile.
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled {
                operation: "complete",
            });
        }

        let request = CompleteRequest {
            bucket: initiated.bucket,
            key: initiated.key,
            upload_id: initiated.upload_id,
            parts: session.part_tags.clone(),
        };
        let response = self.client.complete_multipart_upload(request).await?;

        session.state = UploadState::Completed;
        tracing::info!(
            parts = session.part_tags.len(),
            bytes = session.bytes_uploaded,
            "completed multipart upload"
        );
        self.events.completed(&response);
        session.completion = Some(response);
        Ok(())
    }

    async fn abort_locked(&self, session: &mut UploadSession) -> StorageResult<()> {
        if session.state != UploadState::Uploading {
            return Ok(());
        }
        let Some(initiated) = session.initiated.as_ref() else {
            return Ok(());
        };

        let request = AbortRequest {
            bucket: initiated.bucket.clone(),
            key: initiated.key.clone(),
            upload_id: initiated.upload_id.clone(),
        };
        let response = self.client.abort_multipart_upload(request).await?;

        session.state = UploadState::Aborted;
        tracing::info!(
            upload_id = %response.upload_id,
            parts = session.part_tags.len(),
            "aborted multipart upload"
        );
        self.events.aborted(&response);
        session.abort = Some(response);
        Ok(())
    }
}

impl Drop for BufferedUploadStream {
    fn drop(&mut self) {
        let session = self.session.get_mut();
        if session.state == UploadState::Uploading {
            let upload_id = session
                .initiated
                .as_ref()
                .map(|r| r.upload_id.as_str())
                .unwrap_or_default();
            tracing::warn!(
                bucket = %self.bucket,
                key = %self.key,
                upload_id,
                "upload stream dropped without close, multipart upload left open"
            );
        }
    }
}
