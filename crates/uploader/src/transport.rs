//! Network seam.
//!
//! The host application implements `UploadTransport` for its remote sink.
//! The uploader owns cancellation: it races every `send` against the call's
//! cancellation token and drops the future when the token fires, so
//! implementations only need to be cancel-safe at `.await` points.

use std::fmt;
use std::sync::Arc;

use upqueue_core::JobId;

/// Normalized transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("network error: {0}")]
    Network(String),
    #[error("remote rejected upload ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("upload timed out")]
    Timeout,
    #[error("upload cancelled")]
    Cancelled,
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Progress sink handed to each transport call.
///
/// Cheap to clone; may be called from any thread.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn Fn(f64) + Send + Sync>,
}

impl ProgressReporter {
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// A reporter that discards everything.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Report the transferred fraction, clamped to `0.0..=1.0`.
    pub fn report(&self, fraction: f64) {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        (self.sink)(fraction)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter").finish_non_exhaustive()
    }
}

/// Delivers one payload to the remote sink.
///
/// `job_id` doubles as the idempotency key: the sink should treat a repeated
/// id as the same upload, which is what makes re-sending after a crash safe.
#[async_trait::async_trait]
pub trait UploadTransport: Send + Sync + 'static {
    /// Normalized success result returned to callers.
    type Receipt: Clone + Send + Sync + 'static;

    async fn send(
        &self,
        job_id: &JobId,
        payload: Vec<u8>,
        progress: ProgressReporter,
    ) -> Result<Self::Receipt, TransportError>;
}

#[async_trait::async_trait]
impl<T> UploadTransport for Arc<T>
where
    T: UploadTransport,
{
    type Receipt = T::Receipt;

    async fn send(
        &self,
        job_id: &JobId,
        payload: Vec<u8>,
        progress: ProgressReporter,
    ) -> Result<Self::Receipt, TransportError> {
        (**self).send(job_id, payload, progress).await
    }
}
