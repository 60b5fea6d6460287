use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use shopsync_sync::{RejectReason, WebhookOutcome};

use crate::extractors::WebhookHeaders;
use crate::AppState;

/// Shopify retries any non-2xx delivery, so every authentic event is
/// acknowledged with 200 whatever happened to it downstream.
pub async fn receive(
    State(state): State<AppState>,
    headers: WebhookHeaders,
    body: Bytes,
) -> impl IntoResponse {
    match state
        .webhooks
        .handle(&headers.topic, &body, &headers.signature)
        .await
    {
        WebhookOutcome::Accepted(disposition) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "accepted", "result": disposition })),
        ),
        WebhookOutcome::Rejected(RejectReason::InvalidSignature) => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "invalid webhook signature" })),
        ),
    }
}
