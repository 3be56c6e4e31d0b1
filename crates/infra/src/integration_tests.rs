//! Integration tests for the full upload path.
//!
//! Tests: add_job → JobStore → WorkerPool → UploadPipeline → status
//!
//! Verifies:
//! - An accepted upload ends up stored, recorded and `completed`
//! - Transient storage failures are retried until the attempt budget runs out
//! - Bad input fails after exactly one attempt
//! - Stalled jobs are reclaimed and eventually failed

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::fs;

    use uploadq_core::{FileDescriptor, LeaseId, UserId};

    use crate::config::QueueConfig;
    use crate::jobs::{
        FailureCode, InMemoryJobStore, Job, JobState, JobStatusView, JobStore, sweep_stalled,
    };
    use crate::pipeline::{
        FileStorage, InMemoryFileRecordStore, LocalFileStorage, StorageError, UploadPipeline,
    };
    use crate::queue::{JobHandle, UploadQueue};

    fn config(storage_dir: &Path) -> QueueConfig {
        QueueConfig::default()
            .with_pool_size(2)
            .with_poll_interval(Duration::from_millis(5))
            .with_base_backoff(Duration::from_millis(1))
            .with_storage_dir(storage_dir)
    }

    async fn stage(dir: &Path, name: &str) -> FileDescriptor {
        let staged = dir.join("uploads").join(format!("tmp-{name}"));
        fs::create_dir_all(staged.parent().unwrap()).await.unwrap();
        fs::write(&staged, b"contents").await.unwrap();
        FileDescriptor::new(name, staged, "application/pdf", 8)
    }

    async fn wait_terminal(queue: &UploadQueue<InMemoryJobStore>, handle: JobHandle) -> JobStatusView {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let status = queue.get_status(handle.id).unwrap();
            if status.state.is_terminal() {
                return status;
            }
            assert!(Instant::now() < deadline, "job {} never finished", handle.id);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn upload_is_processed_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let queue = UploadQueue::in_memory(config(&dir.path().join("user_files")));
        let records = Arc::new(InMemoryFileRecordStore::new());
        let pool = queue.start(Arc::new(queue.pipeline(records.clone())));

        let descriptor = stage(dir.path(), "a.pdf").await;
        let handle = queue
            .add_job(descriptor, Some(UserId::new("user-42").unwrap()))
            .unwrap();

        let status = wait_terminal(&queue, handle).await;
        pool.shutdown().await;

        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        assert_eq!(status.attempts, 1);
        let result = status.result.unwrap();
        assert_eq!(result.filename, "a.pdf");
        assert!(result.path.starts_with(dir.path().join("user_files")));
        assert!(fs::try_exists(&result.path).await.unwrap());

        let record = records.get_by_job(handle.id).unwrap();
        assert_eq!(record.id, result.file_id);
        assert_eq!(record.user_id.unwrap().as_str(), "user-42");
        assert_eq!(record.file_type, ".pdf");
    }

    /// Local storage whose first `failures` writes fail.
    struct FlakyStorage {
        inner: LocalFileStorage,
        failures: u32,
        writes: AtomicU32,
    }

    #[async_trait]
    impl FileStorage for FlakyStorage {
        fn destination_for(&self, job: &Job) -> PathBuf {
            self.inner.destination_for(job)
        }

        async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
            self.inner.exists(path).await
        }

        async fn persist(&self, source: &Path, dest: &Path) -> Result<(), StorageError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StorageError::Io {
                    path: dest.to_path_buf(),
                    source: std::io::Error::other("device busy"),
                });
            }
            self.inner.persist(source, dest).await
        }
    }

    fn flaky_pipeline(
        queue: &UploadQueue<InMemoryJobStore>,
        failures: u32,
    ) -> UploadPipeline<FlakyStorage, InMemoryFileRecordStore> {
        UploadPipeline::new(
            queue.config().allowed_extensions.clone(),
            FlakyStorage {
                inner: LocalFileStorage::new(&queue.config().storage_dir),
                failures,
                writes: AtomicU32::new(0),
            },
            InMemoryFileRecordStore::new(),
        )
    }

    #[tokio::test]
    async fn storage_failing_twice_then_succeeding_completes_on_third_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let queue = UploadQueue::in_memory(config(&dir.path().join("user_files")));
        let pool = queue.start(Arc::new(flaky_pipeline(&queue, 2)));

        let handle = queue.add_job(stage(dir.path(), "a.pdf").await, None).unwrap();
        let status = wait_terminal(&queue, handle).await;
        pool.shutdown().await;

        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.attempts, 3);
        assert!(status.error.is_none());
    }

    #[tokio::test]
    async fn storage_failing_every_time_fails_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = UploadQueue::in_memory(config(&dir.path().join("user_files")));
        let pool = queue.start(Arc::new(flaky_pipeline(&queue, u32::MAX)));

        let handle = queue.add_job(stage(dir.path(), "a.pdf").await, None).unwrap();
        let status = wait_terminal(&queue, handle).await;
        pool.shutdown().await;

        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 3);
        assert_eq!(status.error.unwrap().code, FailureCode::StorageWriteFailed);
        assert!(status.result.is_none());
    }

    #[tokio::test]
    async fn missing_source_fails_after_one_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let queue = UploadQueue::in_memory(config(&dir.path().join("user_files")));
        let pool = queue.start(Arc::new(queue.pipeline(InMemoryFileRecordStore::new())));

        let descriptor = FileDescriptor::new(
            "a.pdf",
            dir.path().join("uploads/never-written"),
            "application/pdf",
            8,
        );
        let handle = queue.add_job(descriptor, None).unwrap();
        let status = wait_terminal(&queue, handle).await;
        pool.shutdown().await;

        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.error.unwrap().code, FailureCode::SourceFileMissing);
    }

    #[tokio::test]
    async fn disallowed_extension_reaching_the_pool_fails_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = InMemoryJobStore::arc();
        // The queue accepts .exe; the pipeline behind it does not.
        let permissive = config(&dir.path().join("user_files"))
            .with_allowed_extensions(uploadq_core::AllowedExtensions::parse_list(".exe,.pdf"));
        let queue = UploadQueue::new(store.clone(), permissive);
        let strict = UploadPipeline::new(
            uploadq_core::AllowedExtensions::default(),
            LocalFileStorage::new(dir.path().join("user_files")),
            InMemoryFileRecordStore::new(),
        );
        let pool = queue.start(Arc::new(strict));

        let handle = queue.add_job(stage(dir.path(), "run.exe").await, None).unwrap();
        let status = wait_terminal(&queue, handle).await;
        pool.shutdown().await;

        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.attempts, 1);
        assert_eq!(status.error.unwrap().code, FailureCode::InvalidFileType);
    }

    #[test]
    fn repeatedly_stalled_job_fails() {
        let store = InMemoryJobStore::arc();
        let queue = UploadQueue::new(store.clone(), QueueConfig::default());
        let handle = queue
            .add_job(FileDescriptor::new("a.pdf", "/tmp/a", "application/pdf", 1), None)
            .unwrap();

        let lock = queue.config().lock_duration;
        let max_stalled = queue.config().max_stalled_count;
        let mut now = Utc::now();
        for round in 1..=max_stalled + 1 {
            store.claim_next(LeaseId::new(), now).unwrap().unwrap();
            now += chrono::Duration::from_std(lock).unwrap() + chrono::Duration::seconds(1);
            sweep_stalled(store.as_ref(), lock, max_stalled, now).unwrap();

            let status = queue.get_status(handle.id).unwrap();
            if round <= max_stalled {
                assert_eq!(status.state, JobState::Waiting);
                assert_eq!(status.attempts, 0);
            } else {
                assert_eq!(status.state, JobState::Failed);
                assert_eq!(status.error.unwrap().code, FailureCode::StalledTooManyTimes);
            }
        }
    }
}
