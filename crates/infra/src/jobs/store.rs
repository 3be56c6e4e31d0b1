//! Job storage implementations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use uploadq_core::{JobId, LeaseId};

use super::types::{Job, JobState};

/// Job store abstraction.
///
/// `transition` is the only way job state changes after enqueue; every
/// implementation must apply it atomically with respect to other calls.
pub trait JobStore: Send + Sync {
    /// Enqueue a new job. Never waits on execution.
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError>;

    /// Get a job by ID.
    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError>;

    /// Compare-and-swap on state: apply `mutate` only if the job is currently
    /// in `expected`. Returns the job as committed.
    ///
    /// `mutate` may reject the change (e.g. on a stale lease); nothing is
    /// written in that case.
    fn transition<F>(&self, job_id: JobId, expected: JobState, mutate: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobStoreError>;

    /// The oldest waiting job whose `next_attempt_at` has passed.
    fn oldest_ready(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError>;

    /// List jobs in any of `states`, oldest first.
    fn list_by_states(&self, states: &[JobState]) -> Result<Vec<Job>, JobStoreError>;

    /// Get job statistics.
    fn stats(&self) -> Result<JobStats, JobStoreError>;

    /// Claim the next ready job for `lease`.
    ///
    /// Losing a race against another claimer is not an error: the loser
    /// simply moves on to the next candidate.
    fn claim_next(&self, lease: LeaseId, now: DateTime<Utc>) -> Result<Option<Job>, JobStoreError> {
        loop {
            let Some(job_id) = self.oldest_ready(now)? else {
                return Ok(None);
            };

            match self.transition(job_id, JobState::Waiting, |job| {
                if !job.is_ready(now) {
                    return Err(JobStoreError::NotReady(job.id));
                }
                job.mark_active(lease, now);
                Ok(())
            }) {
                Ok(job) => return Ok(Some(job)),
                Err(JobStoreError::Conflict { .. })
                | Err(JobStoreError::NotFound(_))
                | Err(JobStoreError::NotReady(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort progress write for the attempt holding `lease`.
    ///
    /// Returns `false` when the update no longer applies (job moved on,
    /// lease superseded).
    fn record_progress(
        &self,
        job_id: JobId,
        lease: LeaseId,
        progress: u8,
        now: DateTime<Utc>,
    ) -> Result<bool, JobStoreError> {
        let result = self.transition(job_id, JobState::Active, |job| {
            if job.lease != Some(lease) {
                return Err(JobStoreError::StaleLease(job.id));
            }
            job.mark_progress(progress, now);
            Ok(())
        });

        match result {
            Ok(_) => Ok(true),
            Err(JobStoreError::Conflict { .. })
            | Err(JobStoreError::StaleLease(_))
            | Err(JobStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Job store error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job {id} is {actual}, expected {expected}")]
    Conflict {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("lease on job {0} is no longer held")]
    StaleLease(JobId),
    #[error("job {0} is not ready to run yet")]
    NotReady(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

/// Job statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory job store for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .read()
            .map_err(|_| JobStoreError::Unavailable("job map lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<JobId, Job>>, JobStoreError> {
        self.jobs
            .write()
            .map_err(|_| JobStoreError::Unavailable("job map lock poisoned".to_string()))
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        let mut jobs = self.write()?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        self.read()?
            .get(&job_id)
            .cloned()
            .ok_or(JobStoreError::NotFound(job_id))
    }

    fn transition<F>(&self, job_id: JobId, expected: JobState, mutate: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobStoreError>,
    {
        let mut jobs = self.write()?;
        let current = jobs.get_mut(&job_id).ok_or(JobStoreError::NotFound(job_id))?;

        if current.state != expected {
            return Err(JobStoreError::Conflict {
                id: job_id,
                expected,
                actual: current.state,
            });
        }

        // Mutate a copy so a rejected change leaves the stored job untouched.
        let mut next = current.clone();
        mutate(&mut next)?;
        *current = next;
        Ok(current.clone())
    }

    fn oldest_ready(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError> {
        let jobs = self.read()?;
        Ok(jobs
            .values()
            .filter(|j| j.is_ready(now))
            .min_by_key(|j| (j.next_attempt_at, j.created_at, j.id))
            .map(|j| j.id))
    }

    fn list_by_states(&self, states: &[JobState]) -> Result<Vec<Job>, JobStoreError> {
        let jobs = self.read()?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| states.contains(&j.state))
            .cloned()
            .collect();

        result.sort_by_key(|j| (j.created_at, j.id));
        Ok(result)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        let jobs = self.read()?;
        let mut stats = JobStats::default();

        for job in jobs.values() {
            match job.state {
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }
}

impl<S: JobStore> JobStore for Arc<S> {
    fn enqueue(&self, job: Job) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, job_id: JobId) -> Result<Job, JobStoreError> {
        (**self).get(job_id)
    }

    fn transition<F>(&self, job_id: JobId, expected: JobState, mutate: F) -> Result<Job, JobStoreError>
    where
        F: FnOnce(&mut Job) -> Result<(), JobStoreError>,
    {
        (**self).transition(job_id, expected, mutate)
    }

    fn oldest_ready(&self, now: DateTime<Utc>) -> Result<Option<JobId>, JobStoreError> {
        (**self).oldest_ready(now)
    }

    fn list_by_states(&self, states: &[JobState]) -> Result<Vec<Job>, JobStoreError> {
        (**self).list_by_states(states)
    }

    fn stats(&self) -> Result<JobStats, JobStoreError> {
        (**self).stats()
    }
}
