//! Worker pool: a fixed number of executor tasks running claim → process → commit.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use uploadq_core::LeaseId;

use super::progress::{ProgressReporter, ProgressUpdate, run_progress_writer};
use super::retry::RetryPolicy;
use super::store::{JobStore, JobStoreError};
use super::sweep::sweep_stalled;
use super::types::{Job, JobState, UploadResult};
use crate::pipeline::{JobProcessor, ProcessingError};

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Name for logging
    pub name: String,
    /// Number of executors, and so the maximum number of concurrently active jobs
    pub pool_size: usize,
    /// How long an idle executor sleeps before polling again
    pub poll_interval: Duration,
    /// Upper bound on a single attempt
    pub per_attempt_timeout: Duration,
    /// An active job without a heartbeat for this long is considered stalled
    pub lock_duration: Duration,
    pub stall_sweep_interval: Duration,
    pub max_stalled_count: u32,
    /// Capacity of the progress channel
    pub progress_buffer: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            name: "upload-worker".to_string(),
            pool_size: default_pool_size(),
            poll_interval: Duration::from_millis(100),
            per_attempt_timeout: Duration::from_secs(30),
            lock_duration: Duration::from_secs(30),
            stall_sweep_interval: Duration::from_secs(30),
            max_stalled_count: 3,
            progress_buffer: 256,
        }
    }
}

/// Host parallelism, falling back to 4 when it cannot be determined.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

impl WorkerPoolConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout.max(MIN_INTERVAL);
        self
    }

    pub fn with_lock_duration(mut self, duration: Duration) -> Self {
        self.lock_duration = duration;
        self
    }

    pub fn with_stall_sweep_interval(mut self, interval: Duration) -> Self {
        self.stall_sweep_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_max_stalled_count(mut self, count: u32) -> Self {
        self.max_stalled_count = count;
        self
    }

    pub fn with_progress_buffer(mut self, capacity: usize) -> Self {
        self.progress_buffer = capacity.max(1);
        self
    }
}

/// What happened to a claimed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Back to `waiting`, claimable after `delay`
    Retried { delay: Duration },
    Failed,
    /// The lease was lost (stall reclaim) before the result could be committed
    Lost,
}

/// Pool runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct PoolStats {
    pub jobs_processed: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_lost: u64,
    pub stalled_reclaimed: u64,
    pub stalled_failed: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

#[derive(Debug)]
struct PoolCounters {
    started: Instant,
    processed: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    lost: AtomicU64,
    stalled_reclaimed: AtomicU64,
    stalled_failed: AtomicU64,
    running: AtomicUsize,
}

impl PoolCounters {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            lost: AtomicU64::new(0),
            stalled_reclaimed: AtomicU64::new(0),
            stalled_failed: AtomicU64::new(0),
            running: AtomicUsize::new(0),
        }
    }

    fn record(&self, outcome: JobOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            JobOutcome::Completed => &self.succeeded,
            JobOutcome::Retried { .. } => &self.retried,
            JobOutcome::Failed => &self.failed,
            JobOutcome::Lost => &self.lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            jobs_processed: self.processed.load(Ordering::Relaxed),
            jobs_succeeded: self.succeeded.load(Ordering::Relaxed),
            jobs_retried: self.retried.load(Ordering::Relaxed),
            jobs_failed: self.failed.load(Ordering::Relaxed),
            jobs_lost: self.lost.load(Ordering::Relaxed),
            stalled_reclaimed: self.stalled_reclaimed.load(Ordering::Relaxed),
            stalled_failed: self.stalled_failed.load(Ordering::Relaxed),
            current_running: self.running.load(Ordering::Relaxed),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}

/// Handle to control a running pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    shutdown: watch::Sender<bool>,
    executors: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    stats: Arc<PoolCounters>,
}

impl WorkerPoolHandle {
    /// Request graceful shutdown and wait for every task to stop.
    ///
    /// In-flight attempts run to completion (bounded by the attempt timeout).
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.executors.into_iter().chain(self.background) {
            if let Err(e) = task.await {
                error!(error = %e, "worker pool task ended abnormally");
            }
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }
}

/// Bounded pool of executors over a shared [`JobStore`].
pub struct WorkerPool<S, P> {
    store: Arc<S>,
    processor: Arc<P>,
    retry: RetryPolicy,
    config: WorkerPoolConfig,
    notify: Arc<Notify>,
    stats: Arc<PoolCounters>,
}

impl<S, P> WorkerPool<S, P>
where
    S: JobStore + 'static,
    P: JobProcessor,
{
    pub fn new(store: Arc<S>, processor: Arc<P>, retry: RetryPolicy, config: WorkerPoolConfig) -> Self {
        Self {
            store,
            processor,
            retry,
            config,
            notify: Arc::new(Notify::new()),
            stats: Arc::new(PoolCounters::new()),
        }
    }

    /// Share an enqueue notifier so idle executors wake before the next poll.
    pub fn with_notify(mut self, notify: Arc<Notify>) -> Self {
        self.notify = notify;
        self
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }

    pub fn stats(&self) -> PoolStats {
        self.stats.snapshot()
    }

    /// Start `pool_size` executors, the stall sweeper and the progress writer.
    pub fn spawn(self) -> WorkerPoolHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (progress_tx, progress_rx) = mpsc::channel(self.config.progress_buffer);
        let pool = Arc::new(self);

        let executors = (0..pool.config.pool_size)
            .map(|index| {
                let pool = pool.clone();
                let progress = progress_tx.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    let worker = format!("{}-{}", pool.config.name, index);
                    executor_loop(pool, worker, progress, shutdown).await;
                })
            })
            .collect();
        drop(progress_tx);

        let background = vec![
            tokio::spawn(sweeper_loop(pool.clone(), shutdown_rx.clone())),
            tokio::spawn(run_progress_writer(pool.store.clone(), progress_rx, shutdown_rx)),
        ];

        info!(
            pool = %pool.config.name,
            pool_size = pool.config.pool_size,
            "worker pool started"
        );

        WorkerPoolHandle {
            shutdown: shutdown_tx,
            executors,
            background,
            stats: pool.stats.clone(),
        }
    }

    /// Claim and run one job without progress reporting (for testing or synchronous use).
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, JobStoreError> {
        self.claim_and_run(&self.config.name, None).await
    }

    /// Run one stall sweep pass now.
    pub fn sweep(&self) -> Result<super::sweep::SweepReport, JobStoreError> {
        let report = sweep_stalled(
            self.store.as_ref(),
            self.config.lock_duration,
            self.config.max_stalled_count,
            Utc::now(),
        )?;
        self.stats
            .stalled_reclaimed
            .fetch_add(report.reclaimed as u64, Ordering::Relaxed);
        self.stats
            .stalled_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        Ok(report)
    }

    async fn claim_and_run(
        &self,
        worker: &str,
        progress: Option<&mpsc::Sender<ProgressUpdate>>,
    ) -> Result<Option<JobOutcome>, JobStoreError> {
        let lease = LeaseId::new();
        let Some(job) = self.store.claim_next(lease, Utc::now())? else {
            return Ok(None);
        };

        debug!(worker, job_id = %job.id, attempt = job.attempts, "claimed job");

        let reporter = match progress {
            Some(tx) => ProgressReporter::new(job.id, lease, tx.clone()),
            None => ProgressReporter::detached(job.id),
        };

        self.stats.running.fetch_add(1, Ordering::Relaxed);
        let result = self.run_attempt(&job, reporter).await;
        self.stats.running.fetch_sub(1, Ordering::Relaxed);

        if let Err(e) = &result {
            debug!(worker, job_id = %job.id, attempt = job.attempts, error = %e, "attempt failed");
        }

        let outcome = self.commit(&job, lease, result)?;
        self.stats.record(outcome);
        Ok(Some(outcome))
    }

    /// Run the processor in its own task so a panic or a hang cannot take the
    /// executor down with it.
    async fn run_attempt(&self, job: &Job, reporter: ProgressReporter) -> Result<UploadResult, ProcessingError> {
        let processor = self.processor.clone();
        let attempt_job = job.clone();
        let mut handle = tokio::spawn(async move { processor.process(&attempt_job, &reporter).await });

        let timeout = self.config.per_attempt_timeout;
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ProcessingError::ProcessorPanicked(panic_message(join_error))),
            Err(_) => {
                handle.abort();
                Err(ProcessingError::AttemptTimedOut(timeout))
            }
        }
    }

    fn commit(
        &self,
        job: &Job,
        lease: LeaseId,
        result: Result<UploadResult, ProcessingError>,
    ) -> Result<JobOutcome, JobStoreError> {
        let now = Utc::now();
        let committed = self.store.transition(job.id, JobState::Active, |current| {
            if current.lease != Some(lease) {
                return Err(JobStoreError::StaleLease(current.id));
            }
            match &result {
                Ok(upload) => current.mark_completed(upload.clone(), now),
                Err(e) if self.retry.should_retry(current.attempts, current.max_attempts, e.kind()) => {
                    let delay = self.retry.next_delay(current.attempts);
                    current.mark_retry(e.to_failure(), delay, now);
                }
                Err(e) => current.mark_failed(e.to_failure(), now),
            }
            Ok(())
        });

        let committed = match committed {
            Ok(committed) => committed,
            Err(JobStoreError::StaleLease(_))
            | Err(JobStoreError::Conflict { .. })
            | Err(JobStoreError::NotFound(_)) => {
                warn!(job_id = %job.id, "lease lost before commit, result discarded");
                return Ok(JobOutcome::Lost);
            }
            Err(e) => return Err(e),
        };

        let outcome = match committed.state {
            JobState::Completed => {
                info!(job_id = %committed.id, attempts = committed.attempts, "job completed");
                JobOutcome::Completed
            }
            JobState::Waiting => {
                let delay = self.retry.next_delay(committed.attempts);
                info!(
                    job_id = %committed.id,
                    attempt = committed.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    "job scheduled for retry"
                );
                JobOutcome::Retried { delay }
            }
            _ => {
                warn!(
                    job_id = %committed.id,
                    attempts = committed.attempts,
                    error = ?committed.error,
                    "job failed"
                );
                JobOutcome::Failed
            }
        };
        Ok(outcome)
    }
}

fn panic_message(error: JoinError) -> String {
    if error.is_cancelled() {
        return "attempt task cancelled".to_string();
    }
    let payload: Box<dyn Any + Send> = error.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn executor_loop<S, P>(
    pool: Arc<WorkerPool<S, P>>,
    worker: String,
    progress: mpsc::Sender<ProgressUpdate>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: JobStore + 'static,
    P: JobProcessor,
{
    info!(worker = %worker, "executor started");

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        match pool.claim_and_run(&worker, Some(&progress)).await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => error!(worker = %worker, error = %e, "failed to claim or commit job"),
        }

        tokio::select! {
            _ = tokio::time::sleep(pool.config.poll_interval) => {}
            _ = pool.notify.notified() => {}
            _ = shutdown.changed() => {}
        }
    }

    info!(worker = %worker, "executor stopped");
}

async fn sweeper_loop<S, P>(pool: Arc<WorkerPool<S, P>>, mut shutdown: watch::Receiver<bool>)
where
    S: JobStore + 'static,
    P: JobProcessor,
{
    let mut ticker = tokio::time::interval(pool.config.stall_sweep_interval.max(MIN_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; nothing can be stalled yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match pool.sweep() {
                    Ok(report) if report.reclaimed + report.failed > 0 => {
                        info!(
                            pool = %pool.config.name,
                            reclaimed = report.reclaimed,
                            failed = report.failed,
                            "stall sweep"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(pool = %pool.config.name, error = %e, "stall sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;
    use uploadq_core::{FileDescriptor, FileId};

    use super::*;
    use crate::jobs::store::InMemoryJobStore;
    use crate::jobs::types::{FailureCode, JobPayload};

    fn job(name: &str) -> Job {
        Job::new(
            JobPayload {
                descriptor: FileDescriptor::new(name, format!("/tmp/{name}"), "application/pdf", 1),
                user_id: None,
            },
            3,
        )
    }

    fn ok_result(job: &Job) -> UploadResult {
        UploadResult {
            file_id: FileId::new(),
            filename: job.payload.descriptor.original_name.clone(),
            path: format!("user_files/{}", job.payload.descriptor.original_name).into(),
            user_id: None,
        }
    }

    /// Fails with a transient error for the first `failures` calls.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl JobProcessor for Flaky {
        async fn process(&self, job: &Job, progress: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
            progress.report(50);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(ProcessingError::StorageWriteFailed("disk full".to_string()));
            }
            Ok(ok_result(job))
        }
    }

    struct Rejecting;

    #[async_trait]
    impl JobProcessor for Rejecting {
        async fn process(&self, job: &Job, _: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
            Err(ProcessingError::InvalidFileType {
                extension: job.payload.descriptor.extension(),
            })
        }
    }

    struct Hanging;

    #[async_trait]
    impl JobProcessor for Hanging {
        async fn process(&self, _: &Job, _: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProcessingError::StorageWriteFailed("unreachable".to_string()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl JobProcessor for Panicking {
        async fn process(&self, _: &Job, _: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
            panic!("boom");
        }
    }

    /// Tracks the peak number of concurrent calls.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl JobProcessor for Gauge {
        async fn process(&self, job: &Job, _: &ProgressReporter) -> Result<UploadResult, ProcessingError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ok_result(job))
        }
    }

    fn pool<P: JobProcessor>(
        store: &Arc<InMemoryJobStore>,
        processor: P,
        retry: RetryPolicy,
    ) -> WorkerPool<InMemoryJobStore, P> {
        WorkerPool::new(
            store.clone(),
            Arc::new(processor),
            retry,
            WorkerPoolConfig::default().with_name("test"),
        )
    }

    #[tokio::test]
    async fn successful_job_completes() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = pool(
            &store,
            Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            },
            RetryPolicy::default(),
        );

        assert_eq!(pool.process_next().await.unwrap(), Some(JobOutcome::Completed));
        assert_eq!(pool.process_next().await.unwrap(), None);

        let done = store.get(id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.attempts, 1);
        assert_eq!(done.result.unwrap().filename, "a.pdf");
    }

    #[tokio::test]
    async fn transient_failures_retry_until_success() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = pool(
            &store,
            Flaky {
                failures: 2,
                calls: AtomicU32::new(0),
            },
            RetryPolicy::fixed(3, Duration::ZERO),
        );

        assert!(matches!(
            pool.process_next().await.unwrap(),
            Some(JobOutcome::Retried { .. })
        ));
        assert_eq!(store.get(id).unwrap().progress, 0);
        assert!(matches!(
            pool.process_next().await.unwrap(),
            Some(JobOutcome::Retried { .. })
        ));
        assert_eq!(pool.process_next().await.unwrap(), Some(JobOutcome::Completed));

        let done = store.get(id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.attempts, 3);
        assert_eq!(done.history.len(), 3);

        let stats = pool.stats();
        assert_eq!(stats.jobs_retried, 2);
        assert_eq!(stats.jobs_succeeded, 1);
    }

    #[tokio::test]
    async fn retry_is_delayed_by_backoff() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = pool(
            &store,
            Flaky {
                failures: 1,
                calls: AtomicU32::new(0),
            },
            RetryPolicy::exponential(3, Duration::from_secs(60)),
        );

        assert_eq!(
            pool.process_next().await.unwrap(),
            Some(JobOutcome::Retried {
                delay: Duration::from_secs(60)
            })
        );
        assert_eq!(pool.process_next().await.unwrap(), None, "not due yet");
        assert_eq!(store.get(id).unwrap().state, JobState::Waiting);
    }

    #[tokio::test]
    async fn exhausted_retries_keep_last_error() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = pool(
            &store,
            Flaky {
                failures: u32::MAX,
                calls: AtomicU32::new(0),
            },
            RetryPolicy::fixed(3, Duration::ZERO),
        );

        for _ in 0..2 {
            pool.process_next().await.unwrap();
        }
        assert_eq!(pool.process_next().await.unwrap(), Some(JobOutcome::Failed));

        let failed = store.get(id).unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts, 3);
        let error = failed.error.unwrap();
        assert_eq!(error.code, FailureCode::StorageWriteFailed);
        assert_eq!(error.message, "storage write failed: disk full");
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("run.exe")).unwrap();
        let pool = pool(&store, Rejecting, RetryPolicy::default());

        assert_eq!(pool.process_next().await.unwrap(), Some(JobOutcome::Failed));
        assert_eq!(pool.process_next().await.unwrap(), None);

        let failed = store.get(id).unwrap();
        assert_eq!(failed.attempts, 1);
        assert_eq!(failed.error.unwrap().code, FailureCode::InvalidFileType);
    }

    #[tokio::test]
    async fn hung_attempt_times_out() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = WorkerPool::new(
            store.clone(),
            Arc::new(Hanging),
            RetryPolicy::fixed(3, Duration::ZERO),
            WorkerPoolConfig::default().with_per_attempt_timeout(Duration::from_millis(50)),
        );

        assert!(matches!(
            pool.process_next().await.unwrap(),
            Some(JobOutcome::Retried { .. })
        ));
        let retried = store.get(id).unwrap();
        assert_eq!(retried.state, JobState::Waiting);
        assert_eq!(
            retried.history[0].error.as_ref().map(|e| e.code),
            Some(FailureCode::AttemptTimedOut)
        );
    }

    #[tokio::test]
    async fn panic_becomes_transient_failure() {
        let store = InMemoryJobStore::arc();
        let id = store.enqueue(job("a.pdf")).unwrap();
        let pool = pool(&store, Panicking, RetryPolicy::fixed(2, Duration::ZERO));

        assert!(matches!(
            pool.process_next().await.unwrap(),
            Some(JobOutcome::Retried { .. })
        ));
        let retried = store.get(id).unwrap();
        let last = retried.history.last().unwrap();
        assert_eq!(
            last.error.as_ref().map(|e| e.code),
            Some(FailureCode::ProcessorPanicked)
        );
        assert!(last.error.as_ref().unwrap().message.contains("boom"));
    }

    #[tokio::test]
    async fn commit_with_superseded_lease_is_lost() {
        let store = InMemoryJobStore::arc();
        let queued = job("a.pdf");
        store.enqueue(queued.clone()).unwrap();
        let claimed = store
            .claim_next(LeaseId::new(), queued.created_at)
            .unwrap()
            .unwrap();
        let pool = pool(&store, Rejecting, RetryPolicy::default());

        let outcome = pool
            .commit(&claimed, LeaseId::new(), Ok(ok_result(&claimed)))
            .unwrap();

        assert_eq!(outcome, JobOutcome::Lost);
        assert_eq!(store.get(claimed.id).unwrap().state, JobState::Active);
    }

    #[tokio::test]
    async fn spawned_pool_respects_pool_size() {
        let store = InMemoryJobStore::arc();
        let ids: Vec<_> = (0..12)
            .map(|i| store.enqueue(job(&format!("{i}.pdf"))).unwrap())
            .collect();

        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let handle = WorkerPool::new(
            store.clone(),
            gauge.clone(),
            RetryPolicy::default(),
            WorkerPoolConfig::default()
                .with_pool_size(3)
                .with_poll_interval(Duration::from_millis(5)),
        )
        .spawn();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().jobs_succeeded < ids.len() as u64 {
            assert!(Instant::now() < deadline, "pool did not drain the queue");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(store.stats().unwrap().completed, ids.len());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn sweeper_reclaims_abandoned_job() {
        let store = InMemoryJobStore::arc();
        let queued = job("a.pdf");
        store.enqueue(queued.clone()).unwrap();
        // Claimed by an executor that then vanished.
        store
            .claim_next(LeaseId::new(), queued.created_at)
            .unwrap()
            .unwrap();

        let pool = WorkerPool::new(
            store.clone(),
            Arc::new(Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            }),
            RetryPolicy::default(),
            WorkerPoolConfig::default().with_lock_duration(Duration::ZERO),
        );

        let report = pool.sweep().unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(pool.stats().stalled_reclaimed, 1);

        assert_eq!(pool.process_next().await.unwrap(), Some(JobOutcome::Completed));
        let done = store.get(queued.id).unwrap();
        assert_eq!(done.attempts, 1);
        assert_eq!(done.stalled_count, 1);
    }

    #[tokio::test]
    async fn spawned_sweeper_reclaims_abandoned_job() {
        let store = InMemoryJobStore::arc();
        let queued = job("a.pdf");
        store.enqueue(queued.clone()).unwrap();
        store
            .claim_next(LeaseId::new(), queued.created_at)
            .unwrap()
            .unwrap();

        let handle = WorkerPool::new(
            store.clone(),
            Arc::new(Flaky {
                failures: 0,
                calls: AtomicU32::new(0),
            }),
            RetryPolicy::default(),
            WorkerPoolConfig::default()
                .with_pool_size(1)
                .with_poll_interval(Duration::from_millis(5))
                .with_lock_duration(Duration::from_millis(200))
                .with_stall_sweep_interval(Duration::from_millis(20)),
        )
        .spawn();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().jobs_succeeded < 1 {
            assert!(Instant::now() < deadline, "sweeper never reclaimed the job");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(handle.stats().stalled_reclaimed, 1);
        let done = store.get(queued.id).unwrap();
        assert_eq!(done.state, JobState::Completed);
        assert_eq!(done.stalled_count, 1);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn zero_sweep_interval_does_not_kill_the_sweeper() {
        let config = WorkerPoolConfig {
            stall_sweep_interval: Duration::ZERO,
            lock_duration: Duration::ZERO,
            ..WorkerPoolConfig::default().with_pool_size(1)
        };
        assert!(
            WorkerPoolConfig::default()
                .with_stall_sweep_interval(Duration::ZERO)
                .stall_sweep_interval
                > Duration::ZERO
        );

        let store = InMemoryJobStore::arc();
        let queued = job("a.pdf");
        store.enqueue(queued.clone()).unwrap();
        store
            .claim_next(LeaseId::new(), queued.created_at)
            .unwrap()
            .unwrap();

        let handle = WorkerPool::new(store.clone(), Arc::new(Rejecting), RetryPolicy::default(), config).spawn();

        let deadline = Instant::now() + Duration::from_secs(10);
        while handle.stats().stalled_reclaimed + handle.stats().stalled_failed == 0 {
            assert!(Instant::now() < deadline, "sweeper did not run");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;
    }
}
