use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

pub const TOPIC_HEADER: &str = "X-Shopify-Topic";
pub const HMAC_HEADER: &str = "X-Shopify-Hmac-Sha256";

/// Shopify delivery headers. The topic is mandatory; a missing signature is
/// passed on as empty and rejected by the router like any bad signature.
pub struct WebhookHeaders {
    pub topic: String,
    pub signature: String,
}

#[derive(Debug)]
pub struct WebhookHeadersRejection(String);

impl IntoResponse for WebhookHeadersRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0 });
        (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for WebhookHeaders {
    type Rejection = WebhookHeadersRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let topic = parts
            .headers
            .get(TOPIC_HEADER)
            .ok_or_else(|| WebhookHeadersRejection(format!("missing {TOPIC_HEADER} header")))?
            .to_str()
            .map_err(|_| WebhookHeadersRejection(format!("invalid {TOPIC_HEADER} header value")))?
            .trim()
            .to_string();
        if topic.is_empty() {
            return Err(WebhookHeadersRejection(format!("empty {TOPIC_HEADER} header")));
        }

        let signature = parts
            .headers
            .get(HMAC_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(WebhookHeaders { topic, signature })
    }
}
