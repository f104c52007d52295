//! Timeout-bounded asynchronous mutual exclusion.

use crate::error::{StorageError, StorageResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};

/// Default time an operation waits for the lock (60 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration =
    Duration::from_millis(spool_core::DEFAULT_LOCK_TIMEOUT_MS);

/// A single-permit async lock whose acquisition gives up after a timeout.
///
/// Waiters are served in FIFO order. The lock is not re-entrant: acquiring it
/// again from inside a held section waits for the full timeout and then fails
/// with [`StorageError::LockTimeout`].
#[derive(Debug)]
pub struct AsyncMutex<T> {
    inner: Mutex<T>,
    timeout: Duration,
}

impl<T> AsyncMutex<T> {
    /// Create a lock guarding `value`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Validation`] if `timeout` is zero.
    pub fn new(value: T, timeout: Duration) -> StorageResult<Self> {
        if timeout.is_zero() {
            return Err(StorageError::Validation(
                "lock timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            inner: Mutex::new(value),
            timeout,
        })
    }

    /// Create a lock with [`DEFAULT_LOCK_TIMEOUT`].
    pub fn with_default_timeout(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Acquisition timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for the permit.
    ///
    /// The permit is released when the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the permit was not obtained
    /// within the timeout.
    pub async fn lock(&self) -> StorageResult<MutexGuard<'_, T>> {
        match tokio::time::timeout(self.timeout, self.inner.lock()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "lock acquisition timed out");
                Err(StorageError::LockTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }

    /// Run `work` while holding the permit.
    ///
    /// `work` never runs if the permit cannot be obtained in time. The permit
    /// is released once the returned future finishes, on success or error.
    pub async fn run_exclusive<'a, F, Fut, R>(&'a self, work: F) -> StorageResult<R>
    where
        F: FnOnce(MutexGuard<'a, T>) -> Fut,
        Fut: Future<Output = StorageResult<R>>,
    {
        let guard = self.lock().await?;
        work(guard).await
    }

    /// Mutable access without locking, for callers holding `&mut self`.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consume the lock and return the guarded value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
