//! Stall detection: reclaim `active` jobs whose executor stopped heartbeating.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::store::{JobStore, JobStoreError};
use super::types::JobState;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Returned to `waiting`
    pub reclaimed: usize,
    /// Failed with `StalledTooManyTimes`
    pub failed: usize,
}

fn lock_expired(updated_at: DateTime<Utc>, lock_duration: Duration, now: DateTime<Utc>) -> bool {
    let Ok(lock) = chrono::Duration::from_std(lock_duration) else {
        return false;
    };
    updated_at
        .checked_add_signed(lock)
        .is_some_and(|deadline| deadline <= now)
}

/// Reclaim every `active` job whose lock expired at `now`.
///
/// Each reclaim re-checks lease and staleness inside the transition, so a
/// heartbeat or commit that lands between listing and reclaiming wins.
pub fn sweep_stalled<S: JobStore>(
    store: &S,
    lock_duration: Duration,
    max_stalled_count: u32,
    now: DateTime<Utc>,
) -> Result<SweepReport, JobStoreError> {
    let mut report = SweepReport::default();

    for job in store.list_by_states(&[JobState::Active])? {
        if !lock_expired(job.updated_at, lock_duration, now) {
            continue;
        }

        let seen_lease = job.lease;
        let result = store.transition(job.id, JobState::Active, |current| {
            if current.lease != seen_lease || !lock_expired(current.updated_at, lock_duration, now) {
                return Err(JobStoreError::StaleLease(current.id));
            }
            current.mark_stalled(max_stalled_count, now);
            Ok(())
        });

        match result {
            Ok(committed) if committed.state == JobState::Failed => {
                warn!(
                    job_id = %committed.id,
                    stalled_count = committed.stalled_count,
                    "job stalled too many times, failing"
                );
                report.failed += 1;
            }
            Ok(committed) => {
                debug!(
                    job_id = %committed.id,
                    stalled_count = committed.stalled_count,
                    "reclaimed stalled job"
                );
                report.reclaimed += 1;
            }
            Err(JobStoreError::Conflict { .. })
            | Err(JobStoreError::StaleLease(_))
            | Err(JobStoreError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
    }

    Ok(report)
}
