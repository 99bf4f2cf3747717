//! Submission builder and the handle returned for it.

use std::fmt;

use tokio_util::sync::CancellationToken;

use upqueue_core::{JobId, ValidationError};

use crate::error::UploadError;

/// Progress callback: receives the transferred fraction.
pub type ProgressFn = Box<dyn Fn(f64) + Send + Sync>;

/// Completion callback: receives the receipt or the reason for failure.
pub type DoneFn<R> = Box<dyn FnOnce(Result<R, UploadError>) + Send>;

/// One payload to upload, plus optional callbacks.
pub struct Submission<R> {
    pub(crate) job_id: JobId,
    pub(crate) payload: Vec<u8>,
    pub(crate) on_progress: Option<ProgressFn>,
    pub(crate) on_done: Option<DoneFn<R>>,
}

impl<R> Submission<R> {
    pub fn new(job_id: JobId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            job_id,
            payload: payload.into(),
            on_progress: None,
            on_done: None,
        }
    }

    /// Build a submission from a raw id, validating it.
    pub fn try_new(
        job_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Result<Self, ValidationError> {
        Ok(Self::new(JobId::new(job_id)?, payload))
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_done<F>(mut self, f: F) -> Self
    where
        F: FnOnce(Result<R, UploadError>) + Send + 'static,
    {
        self.on_done = Some(Box::new(f));
        self
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.payload.is_empty() {
            return Err(ValidationError::payload("payload is empty"));
        }
        Ok(())
    }
}

impl<R> fmt::Debug for Submission<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Submission")
            .field("job_id", &self.job_id)
            .field("bytes", &self.payload.len())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_done", &self.on_done.is_some())
            .finish()
    }
}

/// Cancels the transport call started by one submission.
///
/// Cancelling only stops the transfer; the job stays queued and is picked up
/// again by a later re-drive. Use `Uploader::delete` to drop it for good.
#[derive(Debug, Clone)]
pub struct UploadHandle {
    job_id: JobId,
    token: CancellationToken,
}

impl UploadHandle {
    pub(crate) fn new(job_id: JobId, token: CancellationToken) -> Self {
        Self { job_id, token }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_new_validates_id() {
        assert!(Submission::<()>::try_new("", b"x".to_vec()).is_err());
        assert!(Submission::<()>::try_new("a/b", b"x".to_vec()).is_err());
        assert!(Submission::<()>::try_new("ok", b"x".to_vec()).is_ok());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let submission = Submission::<()>::try_new("a", Vec::new()).unwrap();
        assert!(matches!(
            submission.validate(),
            Err(ValidationError::Payload(_))
        ));
    }

    #[test]
    fn handle_cancels_its_token() {
        let token = CancellationToken::new();
        let handle = UploadHandle::new(JobId::new("a").unwrap(), token.clone());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(handle.is_cancelled());
    }
}
