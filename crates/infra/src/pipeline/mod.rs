//! The upload-processing task body.
//!
//! Steps, each a potential failure point:
//!
//! 1. re-validate the extension (permanent failure)
//! 2. short-circuit when a previous attempt already stored the file
//! 3. confirm the staged file is present (permanent failure) and move it
//!    into permanent storage (transient failure)
//! 4. save the metadata record, keyed by job id (transient failure)
//!
//! Progress is reported at 25 / 50 / 100.

pub mod metadata;
pub mod storage;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use uploadq_core::AllowedExtensions;

use crate::jobs::{FailureCode, FailureKind, Job, JobFailure, ProgressReporter, UploadResult};

pub use metadata::{FileRecord, FileRecordStore, InMemoryFileRecordStore, MetadataError, NewFileRecord};
pub use storage::{FileStorage, LocalFileStorage, StorageError};

/// Why an attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    #[error("invalid file type: {extension:?}")]
    InvalidFileType { extension: String },
    #[error("source file missing: {path}")]
    SourceFileMissing { path: String },
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),
    #[error("metadata write failed: {0}")]
    MetadataWriteFailed(String),
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("attempt timed out after {0:?}")]
    AttemptTimedOut(Duration),
    #[error("processor panicked: {0}")]
    ProcessorPanicked(String),
}

impl ProcessingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProcessingError::InvalidFileType { .. }
            | ProcessingError::SourceFileMissing { .. }
            | ProcessingError::MalformedPayload(_) => FailureKind::Permanent,
            ProcessingError::StorageWriteFailed(_)
            | ProcessingError::MetadataWriteFailed(_)
            | ProcessingError::StoreUnavailable(_)
            | ProcessingError::AttemptTimedOut(_)
            | ProcessingError::ProcessorPanicked(_) => FailureKind::Transient,
        }
    }

    pub fn code(&self) -> FailureCode {
        match self {
            ProcessingError::InvalidFileType { .. } => FailureCode::InvalidFileType,
            ProcessingError::SourceFileMissing { .. } => FailureCode::SourceFileMissing,
            ProcessingError::MalformedPayload(_) => FailureCode::MalformedPayload,
            ProcessingError::StorageWriteFailed(_) => FailureCode::StorageWriteFailed,
            ProcessingError::MetadataWriteFailed(_) => FailureCode::MetadataWriteFailed,
            ProcessingError::StoreUnavailable(_) => FailureCode::StoreUnavailable,
            ProcessingError::AttemptTimedOut(_) => FailureCode::AttemptTimedOut,
            ProcessingError::ProcessorPanicked(_) => FailureCode::ProcessorPanicked,
        }
    }

    pub fn to_failure(&self) -> JobFailure {
        JobFailure::new(self.code(), self.to_string())
    }
}

/// Executes one attempt of a job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<UploadResult, ProcessingError>;
}

/// Moves a staged upload into permanent storage and records its metadata.
#[derive(Debug)]
pub struct UploadPipeline<St, R> {
    allowed: AllowedExtensions,
    storage: St,
    records: R,
}

impl<St, R> UploadPipeline<St, R>
where
    St: FileStorage,
    R: FileRecordStore,
{
    pub fn new(allowed: AllowedExtensions, storage: St, records: R) -> Self {
        Self {
            allowed,
            storage,
            records,
        }
    }

    pub fn storage(&self) -> &St {
        &self.storage
    }

    pub fn records(&self) -> &R {
        &self.records
    }
}

#[async_trait]
impl<St, R> JobProcessor for UploadPipeline<St, R>
where
    St: FileStorage,
    R: FileRecordStore,
{
    async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
        let descriptor = &job.payload.descriptor;

        descriptor
            .validate()
            .map_err(|e| ProcessingError::MalformedPayload(e.to_string()))?;
        if !self.allowed.allows(descriptor) {
            return Err(ProcessingError::InvalidFileType {
                extension: descriptor.extension(),
            });
        }
        progress.report(25);

        let dest = self.storage.destination_for(job);
        let already_stored = self
            .storage
            .exists(&dest)
            .await
            .map_err(|e| ProcessingError::StorageWriteFailed(e.to_string()))?;

        if already_stored {
            debug!(job_id = %job.id, dest = %dest.display(), "destination exists from an earlier attempt");
        } else {
            let source_present = self
                .storage
                .exists(&descriptor.temp_path)
                .await
                .map_err(|e| ProcessingError::StorageWriteFailed(e.to_string()))?;
            if !source_present {
                return Err(ProcessingError::SourceFileMissing {
                    path: descriptor.temp_path.display().to_string(),
                });
            }

            self.storage
                .persist(&descriptor.temp_path, &dest)
                .await
                .map_err(|e| ProcessingError::StorageWriteFailed(e.to_string()))?;
        }
        progress.report(50);

        let unique_file_name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let file_id = self
            .records
            .save_file_record(NewFileRecord {
                job_id: job.id,
                user_id: job.payload.user_id.clone(),
                file_name: descriptor.original_name.clone(),
                unique_file_name,
                stored_path: dest.clone(),
                size_bytes: descriptor.size_bytes,
                file_type: descriptor.extension(),
            })
            .await
            .map_err(|e| ProcessingError::MetadataWriteFailed(e.to_string()))?;
        progress.report(100);

        info!(job_id = %job.id, file_id = %file_id, dest = %dest.display(), "upload stored");

        Ok(UploadResult {
            file_id,
            filename: descriptor.original_name.clone(),
            path: dest,
            user_id: job.payload.user_id.clone(),
        })
    }
}
