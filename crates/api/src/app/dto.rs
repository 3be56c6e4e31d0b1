use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use uploadq_core::{FileDescriptor, JobId};
use uploadq_infra::jobs::{JobState, JobStatusView};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// A file the transport layer has already staged on disk.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub original_name: String,
    pub temp_path: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    pub size: u64,
}

fn default_mime_type() -> String {
    "application/octet-stream".to_string()
}

impl UploadRequest {
    pub fn into_descriptor(self) -> FileDescriptor {
        FileDescriptor::new(self.original_name, self.temp_path, self.mime_type, self.size)
    }
}

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Comma-separated states, e.g. `waiting,active`
    pub state: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAccepted {
    pub message: &'static str,
    pub job_id: JobId,
    pub filename: String,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct JobList {
    pub count: usize,
    pub jobs: Vec<JobStatusView>,
}

// -------------------------
// Parsing helpers
// -------------------------

/// An id that does not parse cannot name a job, so it is reported as not found.
pub fn parse_job_id(raw: &str) -> Result<JobId, axum::response::Response> {
    raw.parse::<JobId>().map_err(|_| errors::job_not_found(raw))
}

/// Missing or empty filter means every state.
pub fn parse_states(raw: Option<&str>) -> Result<Vec<JobState>, axum::response::Response> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<JobState>().map_err(|e| {
                errors::json_error(StatusCode::BAD_REQUEST, "invalid_state", e)
            })
        })
        .collect()
}
