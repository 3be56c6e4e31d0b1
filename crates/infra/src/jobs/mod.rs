//! Background upload jobs with retry, backoff and stall recovery.
//!
//! ## Design
//!
//! - Every state change goes through `JobStore::transition`, a compare-and-swap
//!   on the job's state; concurrent claimers get exactly one winner
//! - Each claim carries a lease; commits and progress from a superseded lease
//!   are discarded
//! - Retry decisions and delays come from a single `RetryPolicy`
//! - Active jobs that stop heartbeating are reclaimed by the stall sweep
//!
//! ## Components
//!
//! - `Job`: state, attempts, progress and result of one upload
//! - `JobStore`: persistence for jobs (in-memory)
//! - `WorkerPool`: bounded executors running claim → process → commit
//! - `StatusReporter`: read-only status view

pub mod pool;
pub mod progress;
pub mod retry;
pub mod status;
pub mod store;
pub mod sweep;
pub mod types;

pub use pool::{JobOutcome, PoolStats, WorkerPool, WorkerPoolConfig, WorkerPoolHandle};
pub use progress::{ProgressReporter, ProgressUpdate};
pub use retry::{BackoffStrategy, FailureKind, RetryPolicy};
pub use status::{JobStatusView, StatusError, StatusReporter};
pub use store::{InMemoryJobStore, JobStats, JobStore, JobStoreError};
pub use sweep::{SweepReport, sweep_stalled};
pub use types::{
    FailureCode, Job, JobAttemptRecord, JobFailure, JobPayload, JobState, UploadResult,
};
