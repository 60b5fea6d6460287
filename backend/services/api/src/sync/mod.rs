pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync/jobs", get(handlers::list_jobs))
        .route("/sync/jobs/{id}", get(handlers::get_job))
        .route("/sync/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/sync/jobs/{id}/resume", post(handlers::resume_job))
        .route("/sync/{resource_type}/full", post(handlers::start_full))
        .route(
            "/sync/{resource_type}/incremental",
            post(handlers::start_incremental),
        )
}
