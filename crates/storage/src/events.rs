//! Upload lifecycle notifications.

use crate::client::{
    AbortResponse, CompleteResponse, InitiateResponse, ProgressCallback, TransferProgress,
    UploadPartResponse,
};
use std::fmt;
use std::sync::Arc;

/// A registered notification handler.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Subscriber lists for the notifications a stream raises.
///
/// Handlers run synchronously inside the stream's critical section, in
/// registration order, so they must not call back into the stream.
#[derive(Clone, Default)]
pub struct UploadEvents {
    initiated: Vec<Handler<InitiateResponse>>,
    uploaded_part: Vec<Handler<UploadPartResponse>>,
    transfer_progress: Vec<Handler<TransferProgress>>,
    completed: Vec<Handler<CompleteResponse>>,
    aborted: Vec<Handler<AbortResponse>>,
}

impl UploadEvents {
    pub fn on_initiated<F>(&mut self, handler: F)
    where
        F: Fn(&InitiateResponse) + Send + Sync + 'static,
    {
        self.initiated.push(Arc::new(handler));
    }

    pub fn on_uploaded_part<F>(&mut self, handler: F)
    where
        F: Fn(&UploadPartResponse) + Send + Sync + 'static,
    {
        self.uploaded_part.push(Arc::new(handler));
    }

    pub fn on_transfer_progress<F>(&mut self, handler: F)
    where
        F: Fn(&TransferProgress) + Send + Sync + 'static,
    {
        self.transfer_progress.push(Arc::new(handler));
    }

    pub fn on_completed<F>(&mut self, handler: F)
    where
        F: Fn(&CompleteResponse) + Send + Sync + 'static,
    {
        self.completed.push(Arc::new(handler));
    }

    pub fn on_aborted<F>(&mut self, handler: F)
    where
        F: Fn(&AbortResponse) + Send + Sync + 'static,
    {
        self.aborted.push(Arc::new(handler));
    }

    pub(crate) fn initiated(&self, event: &InitiateResponse) {
        fire(&self.initiated, event);
    }

    pub(crate) fn uploaded_part(&self, event: &UploadPartResponse) {
        fire(&self.uploaded_part, event);
    }

    pub(crate) fn completed(&self, event: &CompleteResponse) {
        fire(&self.completed, event);
    }

    pub(crate) fn aborted(&self, event: &AbortResponse) {
        fire(&self.aborted, event);
    }

    /// Build a progress callback relaying to the progress subscribers, or
    /// `None` when there are none.
    pub(crate) fn progress_callback(&self) -> Option<ProgressCallback> {
        if self.transfer_progress.is_empty() {
            return None;
        }
        let handlers = self.transfer_progress.clone();
        let callback: ProgressCallback = Arc::new(move |progress: TransferProgress| {
            fire(&handlers, &progress);
        });
        Some(callback)
    }
}

fn fire<E>(handlers: &[Handler<E>], event: &E) {
    for handler in handlers {
        handler(event);
    }
}

impl fmt::Debug for UploadEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadEvents")
            .field("initiated", &self.initiated.len())
            .field("uploaded_part", &self.uploaded_part.len())
            .field("transfer_progress", &self.transfer_progress.len())
            .field("completed", &self.completed.len())
            .field("aborted", &self.aborted.len())
            .finish()
    }
}
