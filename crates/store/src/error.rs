//! Job store error.

use std::sync::Arc;

use upqueue_core::{JobId, ValidationError};

use crate::types::JobState;

/// Job store error.
///
/// I/O failures leave the store in its last persisted state; callers decide
/// whether to retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("invalid store namespace {0:?}")]
    InvalidNamespace(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
    #[error("failed to {op} for job {id}: {source}")]
    Io {
        op: &'static str,
        id: JobId,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("failed to encode record for job {id}: {source}")]
    Serialization {
        id: JobId,
        #[source]
        source: Arc<serde_json::Error>,
    },
}

impl JobStoreError {
    pub(crate) fn io(op: &'static str, id: &JobId, source: std::io::Error) -> Self {
        Self::Io {
            op,
            id: id.clone(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn serialization(id: &JobId, source: serde_json::Error) -> Self {
        Self::Serialization {
            id: id.clone(),
            source: Arc::new(source),
        }
    }

    /// Disk or encoding failure, as opposed to a rejected request.
    pub fn is_persistence(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Serialization { .. })
    }
}
