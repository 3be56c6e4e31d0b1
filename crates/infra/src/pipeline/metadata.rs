//! File metadata persistence boundary.
//!
//! Records are keyed by the job that produced them, so a retried attempt that
//! already wrote its record gets the existing `FileId` back instead of a
//! duplicate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use uploadq_core::{FileId, JobId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
    #[error("metadata store unavailable: {0}")]
    Unavailable(String),
    #[error("metadata record rejected: {0}")]
    Rejected(String),
}

/// Metadata to persist for a stored upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFileRecord {
    /// Idempotency key.
    pub job_id: JobId,
    pub user_id: Option<UserId>,
    pub file_name: String,
    pub unique_file_name: String,
    pub stored_path: PathBuf,
    pub size_bytes: u64,
    /// Extension including the dot, e.g. `.pdf`.
    pub file_type: String,
}

/// A persisted metadata record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: FileId,
    pub job_id: JobId,
    pub user_id: Option<UserId>,
    pub file_name: String,
    pub unique_file_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub file_type: String,
    pub status: &'static str,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FileRecordStore: Send + Sync + 'static {
    /// Save a record and return its id. Saving the same `job_id` twice
    /// returns the first id.
    async fn save_file_record(&self, record: NewFileRecord) -> Result<FileId, MetadataError>;
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct InMemoryFileRecordStore {
    by_job: RwLock<HashMap<JobId, FileRecord>>,
}

impl InMemoryFileRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_by_job(&self, job_id: JobId) -> Option<FileRecord> {
        self.by_job.read().ok()?.get(&job_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.by_job.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FileRecordStore for InMemoryFileRecordStore {
    async fn save_file_record(&self, record: NewFileRecord) -> Result<FileId, MetadataError> {
        let mut by_job = self
            .by_job
            .write()
            .map_err(|_| MetadataError::Unavailable("record map lock poisoned".to_string()))?;

        if let Some(existing) = by_job.get(&record.job_id) {
            return Ok(existing.id);
        }

        let saved = FileRecord {
            id: FileId::new(),
            job_id: record.job_id,
            user_id: record.user_id,
            file_name: record.file_name,
            unique_file_name: record.unique_file_name,
            file_path: record.stored_path,
            file_size: record.size_bytes,
            file_type: record.file_type,
            status: "completed",
            created_at: Utc::now(),
        };
        let id = saved.id;
        by_job.insert(record.job_id, saved);
        Ok(id)
    }
}

#[async_trait]
impl<T: FileRecordStore> FileRecordStore for std::sync::Arc<T> {
    async fn save_file_record(&self, record: NewFileRecord) -> Result<FileId, MetadataError> {
        (**self).save_file_record(record).await
    }
}
