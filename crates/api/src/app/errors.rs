use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use uploadq_core::{AllowedExtensions, DomainError};
use uploadq_infra::UploadQueueError;

pub fn queue_error_to_response(err: UploadQueueError, allowed: &AllowedExtensions) -> axum::response::Response {
    match err {
        UploadQueueError::Validation(DomainError::InvalidFileType { extension }) => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": "invalid_file_type",
                "message": format!("file type {extension:?} is not allowed"),
                "allowedTypes": allowed.as_slice(),
            })),
        )
            .into_response(),
        UploadQueueError::Validation(e @ DomainError::FileTooLarge { .. }) => {
            json_error(StatusCode::PAYLOAD_TOO_LARGE, "file_too_large", e.to_string())
        }
        UploadQueueError::Validation(e) => json_error(StatusCode::BAD_REQUEST, "validation_error", e.to_string()),
        UploadQueueError::NotFound(id) => job_not_found(&id.to_string()),
        UploadQueueError::StoreUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg)
        }
    }
}

/// Unknown and unparsable job ids share one 404 body.
pub fn job_not_found(job_id: &str) -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        axum::Json(json!({
            "error": "not_found",
            "message": "job not found",
            "jobId": job_id,
        })),
    )
        .into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
