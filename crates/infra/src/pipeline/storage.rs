//! Permanent file storage.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

use crate::jobs::Job;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where processed uploads end up.
#[async_trait]
pub trait FileStorage: Send + Sync + 'static {
    /// Deterministic destination for a job, stable across its retries.
    fn destination_for(&self, job: &Job) -> PathBuf;

    async fn exists(&self, path: &Path) -> Result<bool, StorageError>;

    /// Move `source` to `dest`. `dest` must either not exist afterwards or
    /// hold the complete file.
    async fn persist(&self, source: &Path, dest: &Path) -> Result<(), StorageError>;
}

/// Local-directory storage: `{root}/{createdAtMillis}-{jobShortId}-{originalName}`.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage directory if it does not exist.
    pub async fn ensure_root(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))
    }
}

/// Name a stored file gets: collision-resistant and identical for every attempt of a job.
pub fn unique_file_name(job: &Job) -> String {
    format!(
        "{}-{}-{}",
        job.created_at.timestamp_millis(),
        job.id.short(),
        job.payload.descriptor.original_name
    )
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    fn destination_for(&self, job: &Job) -> PathBuf {
        self.root.join(unique_file_name(job))
    }

    async fn exists(&self, path: &Path) -> Result<bool, StorageError> {
        fs::try_exists(path).await.map_err(|e| StorageError::io(path, e))
    }

    async fn persist(&self, source: &Path, dest: &Path) -> Result<(), StorageError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        match fs::rename(source, dest).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(source = %source.display(), error = %e, "rename failed, falling back to copy");
            }
        }

        // Cross-device moves: copy next to the destination, then rename into place
        // so `dest` never holds a partial file.
        let mut partial = dest.as_os_str().to_owned();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        if let Err(e) = fs::copy(source, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StorageError::io(dest, e));
        }
        fs::rename(&partial, dest)
            .await
            .map_err(|e| StorageError::io(dest, e))?;
        fs::remove_file(source)
            .await
            .map_err(|e| StorageError::io(source, e))
    }
}
