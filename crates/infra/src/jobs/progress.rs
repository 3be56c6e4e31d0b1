//! Fire-and-forget progress reporting.
//!
//! Executors push updates into a bounded channel; a single writer task drains
//! it into the store. A full channel drops the update instead of blocking the
//! attempt.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use uploadq_core::{JobId, LeaseId};

use super::store::JobStore;

/// A single progress sample for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub job_id: JobId,
    pub lease: LeaseId,
    pub progress: u8,
}

/// Progress callback bound to one job attempt.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    lease: LeaseId,
    tx: Option<mpsc::Sender<ProgressUpdate>>,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, lease: LeaseId, tx: mpsc::Sender<ProgressUpdate>) -> Self {
        Self {
            job_id,
            lease,
            tx: Some(tx),
        }
    }

    /// A reporter that discards everything (for running a processor outside a pool).
    pub fn detached(job_id: JobId) -> Self {
        Self {
            job_id,
            lease: LeaseId::new(),
            tx: None,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Report `progress` percent. Never blocks; returns whether the update was queued.
    pub fn report(&self, progress: u8) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };

        let update = ProgressUpdate {
            job_id: self.job_id,
            lease: self.lease,
            progress: progress.min(100),
        };

        match tx.try_send(update) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(job_id = %self.job_id, progress, "progress channel full, update dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drain progress updates into the store until shutdown or all senders are gone.
pub(crate) async fn run_progress_writer<S>(
    store: Arc<S>,
    mut rx: mpsc::Receiver<ProgressUpdate>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: JobStore + 'static,
{
    loop {
        tokio::select! {
            update = rx.recv() => {
                let Some(update) = update else { break };
                match store.record_progress(update.job_id, update.lease, update.progress, Utc::now()) {
                    Ok(true) => {}
                    Ok(false) => debug!(job_id = %update.job_id, "progress update no longer applies"),
                    Err(e) => warn!(job_id = %update.job_id, error = %e, "failed to record progress"),
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
