//! Read-only job status view.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use uploadq_core::JobId;

use super::store::{JobStore, JobStoreError};
use super::types::{Job, JobFailure, JobState, UploadResult};

/// What a client sees when polling a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: JobId,
    pub state: JobState,
    pub progress: u8,
    pub result: Option<UploadResult>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            state: job.state,
            progress: job.progress,
            result: job.result.clone(),
            error: job.error.clone(),
            created_at: job.created_at,
            attempts: job.attempts,
            max_attempts: job.max_attempts,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<JobStoreError> for StatusError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => StatusError::NotFound(id),
            other => StatusError::StoreUnavailable(other.to_string()),
        }
    }
}

/// Reads job status straight from the store.
#[derive(Debug, Clone)]
pub struct StatusReporter<S> {
    store: S,
}

impl<S: JobStore> StatusReporter<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn status(&self, job_id: JobId) -> Result<JobStatusView, StatusError> {
        let job = self.store.get(job_id)?;
        Ok(JobStatusView::from(&job))
    }
}
