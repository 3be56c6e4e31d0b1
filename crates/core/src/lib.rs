//! `uploadq-core`: domain building blocks for the upload queue.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the uploaded-file descriptor and the extension allow-list.

pub mod error;
pub mod id;
pub mod upload;

pub use error::{DomainError, DomainResult};
pub use id::{FileId, JobId, LeaseId, UserId};
pub use upload::{AllowedExtensions, FileDescriptor};
