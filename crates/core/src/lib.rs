//! `upqueue-core`: identifiers and validation shared by the queue crates.
//!
//! This crate has no I/O; it only decides what a valid job identifier is.

pub mod error;
pub mod id;

pub use error::{ValidationError, ValidationResult};
pub use id::JobId;
