//! Job record and lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use upqueue_core::JobId;

/// Upload state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be sent
    Pending,
    /// Most recently observed mid-transfer (not proof of an outstanding call)
    Processing,
    /// Delivered; the record stays until removed
    Complete,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Complete => "complete",
        }
    }

    /// Whether the job still needs uploading.
    pub fn is_outstanding(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Processing)
    }

    /// `Complete` is terminal; every other move is allowed.
    pub fn can_transition_to(&self, to: JobState) -> bool {
        !matches!((self, to), (JobState::Complete, JobState::Pending | JobState::Processing))
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Caller-supplied id; also the file stem on disk and the remote idempotency key
    pub id: JobId,
    /// Current state
    pub state: JobState,
    /// When the job was (re-)enqueued; never changes afterwards
    pub enqueued_at: DateTime<Utc>,
    /// When the job last moved into `Processing`
    #[serde(default)]
    pub processing_started_at: Option<DateTime<Utc>>,
    /// When the last terminal failure was recorded
    #[serde(default)]
    pub last_error_at: Option<DateTime<Utc>>,
    /// Message of the last terminal failure
    #[serde(default)]
    pub last_error: Option<String>,
    /// Reserved for a future backoff policy; nothing increments it yet
    #[serde(default)]
    pub retry_count: u32,
}

impl Job {
    /// Create a fresh pending job.
    pub fn new(id: JobId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id,
            state: JobState::Pending,
            enqueued_at,
            processing_started_at: None,
            last_error_at: None,
            last_error: None,
            retry_count: 0,
        }
    }

    /// Move to `state`, stamping or clearing `processing_started_at`.
    ///
    /// Callers check `can_transition_to` first.
    pub fn set_state(&mut self, state: JobState, now: DateTime<Utc>) {
        match state {
            JobState::Processing if self.state != JobState::Processing => {
                self.processing_started_at = Some(now);
            }
            JobState::Processing => {}
            JobState::Pending | JobState::Complete => {
                self.processing_started_at = None;
            }
        }
        self.state = state;
    }

    /// Record a terminal failure and put the job back in line.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.set_state(JobState::Pending, now);
        self.last_error_at = Some(now);
        self.last_error = Some(error.into());
    }

    /// A `Processing` job whose transfer started more than `threshold` ago.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.state != JobState::Processing {
            return false;
        }
        let Some(started) = self.processing_started_at else {
            // Processing without a start stamp cannot be aged; treat as abandoned.
            return true;
        };
        let threshold = chrono::Duration::from_std(threshold).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(started) > threshold
    }

    /// FIFO ordering key; ties fall back to the id so ordering is total.
    pub fn fifo_key(&self) -> (DateTime<Utc>, &JobId) {
        (self.enqueued_at, &self.id)
    }
}

/// Job counts per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub processing: usize,
    pub complete: usize,
}

impl JobStats {
    pub fn total(&self) -> usize {
        self.pending + self.processing + self.complete
    }

    pub fn outstanding(&self) -> usize {
        self.pending + self.processing
    }
}
