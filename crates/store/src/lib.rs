//! Durable job store for the upload queue.
//!
//! ## Design
//!
//! - One JSON record per job, one raw blob per payload, both named by job id
//! - Records are loaded once at open and written through on every mutation
//! - Jobs left in `Processing` by a previous process are reset to `Pending`
//! - Selection is FIFO by `enqueued_at`, with stale `Processing` jobs as a
//!   secondary pool
//!
//! ## Components
//!
//! - `Job` / `JobState`: the record and its lifecycle
//! - `JobStore`: the store itself (single owner per namespace)
//! - `StoreLayout`: on-disk paths and atomic writes
//! - `StoreConfig`: root directory, namespace and staleness threshold

pub mod config;
pub mod error;
pub mod layout;
pub mod store;
pub mod types;

pub use config::StoreConfig;
pub use error::JobStoreError;
pub use layout::StoreLayout;
pub use store::JobStore;
pub use types::{Job, JobState, JobStats};
pub use upqueue_core::{JobId, ValidationError};
