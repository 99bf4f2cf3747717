//! Caller-facing upload error.

use upqueue_core::{JobId, ValidationError};
use upqueue_store::JobStoreError;

use crate::transport::TransportError;

/// Why a submission or upload did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UploadError {
    /// Rejected before queueing; nothing was stored.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The store could not persist the change.
    #[error(transparent)]
    Store(#[from] JobStoreError),
    /// The transfer failed; the job is back in line and will be retried.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The job was removed while its upload was in flight.
    #[error("job {0} was removed while its upload was in flight")]
    NotFound(JobId),
    #[error("uploader has been shut down")]
    Shutdown,
    #[error("uploader must be created inside a Tokio runtime")]
    NoRuntime,
}

impl UploadError {
    /// A transient failure that a later attempt may get past.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(e) => !e.is_cancelled(),
            Self::Store(e) => e.is_persistence(),
            _ => false,
        }
    }
}
