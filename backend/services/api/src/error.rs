use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use shopsync_common::error::ShopsyncError;

pub struct ApiError(pub ShopsyncError);

impl From<ShopsyncError> for ApiError {
    fn from(err: ShopsyncError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            ShopsyncError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ShopsyncError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            err @ (ShopsyncError::AlreadyRunning(_) | ShopsyncError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
