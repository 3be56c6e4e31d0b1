use axum::{
    Router,
    routing::{get, post},
};

pub mod system;
pub mod uploads;

/// Router for the upload and status endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/upload", post(uploads::upload))
        .route("/status/:job_id", get(uploads::status))
        .route("/jobs", get(uploads::list_jobs))
}
