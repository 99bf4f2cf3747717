//! Validation error model.

use thiserror::Error;

/// Result type for input validation.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Rejected caller input.
///
/// Validation failures are reported synchronously and never reach the store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The job identifier was empty.
    #[error("job id must not be empty")]
    EmptyId,

    /// The job identifier exceeds the maximum length.
    #[error("job id is {len} bytes, maximum is {max}")]
    IdTooLong { len: usize, max: usize },

    /// The job identifier cannot be used as a file name.
    #[error("job id {id:?} is not usable as a file name: {reason}")]
    UnsafeId { id: String, reason: &'static str },

    /// The payload was rejected before it was queued.
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl ValidationError {
    pub fn unsafe_id(id: impl Into<String>, reason: &'static str) -> Self {
        Self::UnsafeId {
            id: id.into(),
            reason,
        }
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }
}
