use std::sync::Arc;

use tracing::info;

use uploadq_infra::jobs::{InMemoryJobStore, WorkerPoolHandle};
use uploadq_infra::pipeline::{InMemoryFileRecordStore, LocalFileStorage, StorageError};
use uploadq_infra::{QueueConfig, UploadQueue};

/// Shared state behind every handler.
#[derive(Debug)]
pub struct AppServices {
    pub queue: UploadQueue<InMemoryJobStore>,
    pub records: Arc<InMemoryFileRecordStore>,
}

impl AppServices {
    /// Spawn the worker pool running the upload pipeline.
    pub fn start_workers(&self) -> WorkerPoolHandle {
        let pipeline = self.queue.pipeline(self.records.clone());
        self.queue.start(Arc::new(pipeline))
    }
}

/// Wire the in-memory queue and make sure the storage directory exists.
pub async fn build_services(config: QueueConfig) -> Result<AppServices, StorageError> {
    LocalFileStorage::new(&config.storage_dir).ensure_root().await?;

    info!(
        storage_dir = %config.storage_dir.display(),
        pool_size = config.pool_size,
        max_attempts = config.max_attempts,
        "upload queue configured"
    );

    Ok(AppServices {
        queue: UploadQueue::in_memory(config),
        records: Arc::new(InMemoryFileRecordStore::new()),
    })
}
