use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::debug;

use uploadq_core::UserId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

const USER_HEADER: &str = "x-user-id";

fn user_from_headers(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| UserId::new(v).ok())
}

pub async fn upload(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    Json(body): Json<dto::UploadRequest>,
) -> axum::response::Response {
    let descriptor = body.into_descriptor();
    let filename = descriptor.original_name.clone();
    let user_id = user_from_headers(&headers);

    match services.queue.add_job(descriptor, user_id) {
        Ok(handle) => (
            StatusCode::ACCEPTED,
            Json(dto::UploadAccepted {
                message: "File upload started",
                job_id: handle.id,
                filename,
                status: "processing",
            }),
        )
            .into_response(),
        Err(e) => {
            debug!(filename = %filename, error = %e, "upload rejected");
            errors::queue_error_to_response(e, &services.queue.config().allowed_extensions)
        }
    }
}

pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(job_id): Path<String>,
) -> axum::response::Response {
    let job_id = match dto::parse_job_id(&job_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.queue.get_status(job_id) {
        Ok(view) => Json(view).into_response(),
        Err(e) => errors::queue_error_to_response(e, &services.queue.config().allowed_extensions),
    }
}

pub async fn list_jobs(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::JobsQuery>,
) -> axum::response::Response {
    let states = match dto::parse_states(query.state.as_deref()) {
        Ok(states) => states,
        Err(resp) => return resp,
    };

    match services.queue.jobs(&states) {
        Ok(jobs) => Json(dto::JobList {
            count: jobs.len(),
            jobs,
        })
        .into_response(),
        Err(e) => errors::queue_error_to_response(e, &services.queue.config().allowed_extensions),
    }
}
