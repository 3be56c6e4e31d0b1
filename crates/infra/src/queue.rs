//! Upload queue facade: the enqueue and status boundaries.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::info;

use uploadq_core::{DomainError, FileDescriptor, JobId, UserId};

use crate::config::QueueConfig;
use crate::jobs::{
    InMemoryJobStore, Job, JobPayload, JobState, JobStats, JobStatusView, JobStore, JobStoreError,
    StatusError, StatusReporter, WorkerPool, WorkerPoolHandle,
};
use crate::pipeline::{FileRecordStore, JobProcessor, LocalFileStorage, UploadPipeline};

/// Returned by `add_job`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobHandle {
    pub id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadQueueError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),
}

impl From<JobStoreError> for UploadQueueError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(id) => UploadQueueError::NotFound(id),
            other => UploadQueueError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<StatusError> for UploadQueueError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::NotFound(id) => UploadQueueError::NotFound(id),
            StatusError::StoreUnavailable(msg) => UploadQueueError::StoreUnavailable(msg),
        }
    }
}

/// Accepts uploads, answers status queries and starts the worker pool.
#[derive(Debug)]
pub struct UploadQueue<S> {
    store: Arc<S>,
    status: StatusReporter<Arc<S>>,
    config: QueueConfig,
    notify: Arc<Notify>,
}

impl UploadQueue<InMemoryJobStore> {
    pub fn in_memory(config: QueueConfig) -> Self {
        Self::new(InMemoryJobStore::arc(), config)
    }
}

impl<S: JobStore + 'static> UploadQueue<S> {
    pub fn new(store: Arc<S>, config: QueueConfig) -> Self {
        Self {
            status: StatusReporter::new(store.clone()),
            store,
            config,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validate and enqueue an upload. Returns as soon as the job is stored.
    pub fn add_job(&self, descriptor: FileDescriptor, user_id: Option<UserId>) -> Result<JobHandle, UploadQueueError> {
        descriptor.validate()?;
        self.config.allowed_extensions.check(&descriptor)?;
        if descriptor.size_bytes > self.config.max_file_size_bytes {
            return Err(DomainError::FileTooLarge {
                size_bytes: descriptor.size_bytes,
                limit_bytes: self.config.max_file_size_bytes,
            }
            .into());
        }

        let job = Job::new(JobPayload { descriptor, user_id }, self.config.max_attempts);
        let id = self.store.enqueue(job)?;
        self.notify.notify_one();

        info!(job_id = %id, "upload queued");
        Ok(JobHandle { id })
    }

    pub fn get_status(&self, job_id: JobId) -> Result<JobStatusView, UploadQueueError> {
        Ok(self.status.status(job_id)?)
    }

    /// Jobs in any of `states`, oldest first. An empty slice means every state.
    pub fn jobs(&self, states: &[JobState]) -> Result<Vec<JobStatusView>, UploadQueueError> {
        let all = JobState::ALL;
        let states = if states.is_empty() { &all[..] } else { states };
        Ok(self
            .store
            .list_by_states(states)?
            .iter()
            .map(JobStatusView::from)
            .collect())
    }

    pub fn stats(&self) -> Result<JobStats, UploadQueueError> {
        Ok(self.store.stats()?)
    }

    /// Upload pipeline writing under the configured storage directory.
    pub fn pipeline<R: FileRecordStore>(&self, records: R) -> UploadPipeline<LocalFileStorage, R> {
        UploadPipeline::new(
            self.config.allowed_extensions.clone(),
            LocalFileStorage::new(&self.config.storage_dir),
            records,
        )
    }

    /// Spawn the worker pool. Must be called inside a tokio runtime.
    pub fn start<P: JobProcessor>(&self, processor: Arc<P>) -> WorkerPoolHandle {
        WorkerPool::new(
            self.store.clone(),
            processor,
            self.config.retry_policy(),
            self.config.pool_config(),
        )
        .with_notify(self.notify.clone())
        .spawn()
    }
}
