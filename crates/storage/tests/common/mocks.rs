use async_trait::async_trait;
use bytes::Bytes;
use spool_core::PartTag;
use spool_storage::client::{
    AbortRequest, AbortResponse, CompleteRequest, CompleteResponse, EncryptionMethod,
    InitiateRequest, InitiateResponse, ProgressCallback, StorageClient, TransferProgress,
    UploadPartRequest, UploadPartResponse,
};
use spool_storage::error::{StorageError, StorageResult};
use spool_storage::stream::CancelHandle;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use tokio::time::Duration;

/// A part as received by [`RecordingClient`].
#[allow(dead_code)]
#[derive(Clone, Debug)]
pub struct RecordedPart {
    pub part_number: i32,
    pub size: usize,
    pub is_last_part: bool,
    pub body: Bytes,
}

/// In-memory storage client that records every call it receives.
///
/// Failures and cancellation can be injected at a given part number.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingClient {
    encryption: EncryptionMethod,
    upload_delay: Duration,
    pub initiate_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub complete_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    fail_at_part: AtomicI32,
    fail_complete: AtomicBool,
    cancel_at_part: Mutex<Option<(i32, CancelHandle)>>,
    initiate_requests: Mutex<Vec<InitiateRequest>>,
    parts: Mutex<Vec<RecordedPart>>,
    completed_parts: Mutex<Option<Vec<PartTag>>>,
}

#[allow(dead_code)]
impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every upload as SSE-S3 encrypted.
    pub fn encrypting() -> Self {
        Self {
            encryption: EncryptionMethod::Aes256,
            ..Self::default()
        }
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    /// Fail the upload of `part_number` with a transport error.
    pub fn fail_at_part(self, part_number: i32) -> Self {
        self.fail_at_part.store(part_number, Ordering::SeqCst);
        self
    }

    /// Fail every completion call with a transport error.
    pub fn failing_complete(self) -> Self {
        self.fail_complete.store(true, Ordering::SeqCst);
        self
    }

    /// Cancel `handle` while `part_number` is being uploaded.
    pub fn cancel_at_part(&self, part_number: i32, handle: CancelHandle) {
        *self.cancel_at_part.lock().unwrap() = Some((part_number, handle));
    }

    pub fn parts(&self) -> Vec<RecordedPart> {
        self.parts.lock().unwrap().clone()
    }

    pub fn initiate_requests(&self) -> Vec<InitiateRequest> {
        self.initiate_requests.lock().unwrap().clone()
    }

    /// Part tags sent with the completion call, if any.
    pub fn completed_parts(&self) -> Option<Vec<PartTag>> {
        self.completed_parts.lock().unwrap().clone()
    }

    /// Concatenated bodies of all received parts.
    pub fn assembled(&self) -> Vec<u8> {
        self.parts()
            .iter()
            .flat_map(|part| part.body.iter().copied())
            .collect()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageClient for RecordingClient {
    async fn initiate_multipart_upload(
        &self,
        request: &InitiateRequest,
    ) -> StorageResult<InitiateResponse> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        self.initiate_requests.lock().unwrap().push(request.clone());
        Ok(InitiateResponse {
            upload_id: "recorded-upload".to_string(),
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            encryption: self.encryption.clone(),
        })
    }

    async fn upload_part(
        &self,
        request: UploadPartRequest,
        progress: Option<ProgressCallback>,
    ) -> StorageResult<UploadPartResponse> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);

        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        if let Some((part_number, handle)) = self.cancel_at_part.lock().unwrap().as_ref() {
            if *part_number == request.part_number {
                handle.cancel();
            }
        }
        if self.fail_at_part.load(Ordering::SeqCst) == request.part_number {
            return Err(StorageError::transport(std::io::Error::other(format!(
                "injected failure at part {}",
                request.part_number
            ))));
        }

        if let Some(progress) = progress {
            progress(TransferProgress {
                bytes_transferred: request.part_size as u64,
                total_bytes: request.part_size as u64,
            });
        }

        self.parts.lock().unwrap().push(RecordedPart {
            part_number: request.part_number,
            size: request.part_size,
            is_last_part: request.is_last_part,
            body: request.body,
        });
        Ok(UploadPartResponse {
            part_number: request.part_number,
            e_tag: format!("\"etag-{}\"", request.part_number),
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: CompleteRequest,
    ) -> StorageResult<CompleteResponse> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_complete.load(Ordering::SeqCst) {
            return Err(StorageError::transport(std::io::Error::other(
                "injected completion failure",
            )));
        }
        *self.completed_parts.lock().unwrap() = Some(request.parts);
        Ok(CompleteResponse {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            e_tag: Some("\"final\"".to_string()),
            location: Some(format!("/{}/{}", request.bucket, request.key)),
            version_id: None,
        })
    }

    async fn abort_multipart_upload(&self, request: AbortRequest) -> StorageResult<AbortResponse> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Ok(AbortResponse {
            bucket: request.bucket,
            key: request.key,
            upload_id: request.upload_id,
        })
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}
