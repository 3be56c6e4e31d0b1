//! Core job types and lifecycle mutations.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use uploadq_core::{FileDescriptor, FileId, JobId, LeaseId, UserId};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting to be claimed (possibly delayed by a retry backoff)
    Waiting,
    /// Claimed by an executor
    Active,
    /// Finished successfully
    Completed,
    /// Finished with an error; no further attempts
    Failed,
}

impl JobState {
    pub const ALL: [JobState; 4] = [
        JobState::Waiting,
        JobState::Active,
        JobState::Completed,
        JobState::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state: {other}")),
        }
    }
}

/// What a job carries: the staged upload and who sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub descriptor: FileDescriptor,
    pub user_id: Option<UserId>,
}

/// Success payload of a processed upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub file_id: FileId,
    /// Original name as uploaded.
    pub filename: String,
    /// Where the file now lives in permanent storage.
    pub path: PathBuf,
    pub user_id: Option<UserId>,
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCode {
    InvalidFileType,
    SourceFileMissing,
    MalformedPayload,
    StorageWriteFailed,
    MetadataWriteFailed,
    StoreUnavailable,
    AttemptTimedOut,
    ProcessorPanicked,
    /// An attempt's lock expired and the sweep put the job back in the queue
    LockExpired,
    StalledTooManyTimes,
}

/// Failure recorded on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub code: FailureCode,
    pub message: String,
}

impl JobFailure {
    pub fn new(code: FailureCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

/// Record of a job execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobAttemptRecord {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub error: Option<JobFailure>,
    pub duration_ms: u64,
}

/// One upload-processing unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub payload: JobPayload,
    pub state: JobState,
    /// Incremented each time an executor claims the job
    pub attempts: u32,
    pub max_attempts: u32,
    /// 0..=100, only meaningful while active
    pub progress: u8,
    /// Set only when completed
    pub result: Option<UploadResult>,
    /// Set only when failed
    pub error: Option<JobFailure>,
    /// How many times the stall sweep reclaimed this job
    pub stalled_count: u32,
    /// Claim token of the current executor, set only while active
    pub lease: Option<LeaseId>,
    /// Earliest time the job may be claimed
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Last transition or heartbeat
    pub updated_at: DateTime<Utc>,
    /// When the current attempt was claimed
    pub started_at: Option<DateTime<Utc>>,
    pub history: Vec<JobAttemptRecord>,
}

impl Job {
    /// Create a new waiting job, immediately claimable.
    pub fn new(payload: JobPayload, max_attempts: u32) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            payload,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            progress: 0,
            result: None,
            error: None,
            stalled_count: 0,
            lease: None,
            next_attempt_at: now,
            created_at: now,
            updated_at: now,
            started_at: None,
            history: Vec::new(),
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.next_attempt_at <= now
    }

    /// `waiting → active`: start a new attempt under `lease`.
    pub fn mark_active(&mut self, lease: LeaseId, now: DateTime<Utc>) {
        self.state = JobState::Active;
        self.attempts += 1;
        self.progress = 0;
        self.lease = Some(lease);
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Raise progress; lower values are ignored. Doubles as a heartbeat.
    pub fn mark_progress(&mut self, progress: u8, now: DateTime<Utc>) -> bool {
        let progress = progress.min(100);
        self.updated_at = now;
        if progress > self.progress {
            self.progress = progress;
            true
        } else {
            false
        }
    }

    /// `active → completed`.
    pub fn mark_completed(&mut self, result: UploadResult, now: DateTime<Utc>) {
        self.record_attempt(None, now);
        self.state = JobState::Completed;
        self.progress = 100;
        self.result = Some(result);
        self.error = None;
        self.lease = None;
        self.updated_at = now;
    }

    /// `active → waiting` after a retryable failure.
    pub fn mark_retry(&mut self, failure: JobFailure, delay: Duration, now: DateTime<Utc>) {
        self.record_attempt(Some(failure), now);
        self.state = JobState::Waiting;
        self.progress = 0;
        self.lease = None;
        self.started_at = None;
        self.next_attempt_at = now + chrono::Duration::from_std(delay).unwrap_or_default();
        self.updated_at = now;
    }

    /// `active → failed`, recording the failure verbatim.
    pub fn mark_failed(&mut self, failure: JobFailure, now: DateTime<Utc>) {
        self.record_attempt(Some(failure.clone()), now);
        self.state = JobState::Failed;
        self.result = None;
        self.error = Some(failure);
        self.lease = None;
        self.updated_at = now;
    }

    /// Stall reclaim of an abandoned `active` job.
    ///
    /// The abandoned attempt does not count against `max_attempts`; it is
    /// tracked by `stalled_count` instead. Once that exceeds
    /// `max_stalled_count` the job fails with `StalledTooManyTimes`.
    pub fn mark_stalled(&mut self, max_stalled_count: u32, now: DateTime<Utc>) -> JobState {
        self.stalled_count += 1;

        if self.stalled_count > max_stalled_count {
            let failure = JobFailure::new(
                FailureCode::StalledTooManyTimes,
                format!(
                    "job stalled {} times (limit {})",
                    self.stalled_count, max_stalled_count
                ),
            );
            self.mark_failed(failure, now);
        } else {
            self.record_attempt(
                Some(JobFailure::new(
                    FailureCode::LockExpired,
                    format!("lock expired, reclaimed ({} so far)", self.stalled_count),
                )),
                now,
            );
            self.attempts = self.attempts.saturating_sub(1);
            self.state = JobState::Waiting;
            self.progress = 0;
            self.lease = None;
            self.started_at = None;
            self.next_attempt_at = now;
            self.updated_at = now;
        }
        self.state
    }

    fn record_attempt(&mut self, error: Option<JobFailure>, now: DateTime<Utc>) {
        let started_at = self.started_at.unwrap_or(now);
        self.history.push(JobAttemptRecord {
            attempt: self.attempts,
            started_at,
            finished_at: now,
            success: error.is_none(),
            error,
            duration_ms: (now - started_at).num_milliseconds().max(0) as u64,
        });
    }
}
