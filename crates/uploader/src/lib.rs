//! Upload orchestration on top of the durable job store.
//!
//! ## Design
//!
//! - One transport call per job id at a time, tracked in a `RequestRegistry`
//! - Each completion re-drives the queue; each failure re-drives it after a
//!   cool-down, so a dead network cannot turn into a retry storm
//! - The store is the only source of truth; an upload whose job was deleted
//!   mid-flight is reported as `NotFound` and never resurrects the job
//!
//! ## Components
//!
//! - `Uploader`: the orchestrator handle (`submit`, `delete`, `upload_pending_jobs`)
//! - `UploadTransport`: the network seam implemented by the host application
//! - `RequestRegistry`: cancelable handles for outstanding calls
//! - `UploaderConfig`: retry delay, pool size, store location

pub mod config;
pub mod error;
pub mod registry;
pub mod submission;
pub mod transport;
pub mod uploader;

pub use config::UploaderConfig;
pub use error::UploadError;
pub use registry::{Registration, Release, RequestRegistry};
pub use submission::{DoneFn, ProgressFn, Submission, UploadHandle};
pub use transport::{ProgressReporter, TransportError, UploadTransport};
pub use uploader::{CompletionCallback, FailureCallback, Uploader};

pub use upqueue_core::{JobId, ValidationError};
pub use upqueue_store::{Job, JobState, JobStats, JobStore, JobStoreError, StoreConfig};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Callbacks never run under these locks, so a poisoned guard only means a
/// panic inside our own short critical sections; the data is still coherent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
