use reqwest::StatusCode;

/// How the sync engine should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Timeouts, 5xx, throttling. Retried at the call level; once retries
    /// run out the job fails.
    Transient,
    /// Shopify rejected the payload. Skip the record, keep the job going.
    Validation,
    /// Bad or expired token. Abort the job.
    Authentication,
    /// Anything else that cannot be fixed by retrying.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum ShopifyClientError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("authentication failed (HTTP {status}): {body}")]
    Authentication { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rejected by shopify: {0}")]
    Validation(String),

    #[error("rate limit backoff could not be computed: {0}")]
    RateLimitExceeded(String),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("bulk operation {id} ended {status}: {error_code}")]
    BulkOperationFailed {
        id: String,
        status: String,
        error_code: String,
    },

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ShopifyClientError {
    pub fn kind(&self) -> ApiErrorKind {
        match self {
            Self::HttpError { .. } | Self::Validation(_) => ApiErrorKind::Validation,
            Self::Authentication { .. } => ApiErrorKind::Authentication,
            Self::Transient(_) | Self::MaxRetriesExceeded { .. } => ApiErrorKind::Transient,
            Self::RequestError(e) if e.is_timeout() || e.is_connect() => ApiErrorKind::Transient,
            Self::RequestError(_)
            | Self::RateLimitExceeded(_)
            | Self::BulkOperationFailed { .. }
            | Self::Decode(_) => ApiErrorKind::Fatal,
        }
    }
}
