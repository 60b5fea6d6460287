use thiserror::Error;

use crate::types::ResourceType;

#[derive(Debug, Error)]
pub enum ShopsyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("a sync job is already active for resource '{0}'")]
    AlreadyRunning(ResourceType),

    #[error("invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type ShopsyncResult<T> = Result<T, ShopsyncError>;
