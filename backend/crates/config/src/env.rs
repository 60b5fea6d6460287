use serde::Deserialize;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// Shared secret Shopify signs webhook bodies with. Only the API needs it.
    pub webhook_secret: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present, then reads required vars.
    pub fn from_env() -> ShopsyncResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: get_var("DATABASE_URL")?,
            host: get_var_or("HOST", "0.0.0.0"),
            port: get_var_or("PORT", "8080")
                .parse()
                .map_err(|e| ShopsyncError::Config(format!("invalid PORT: {e}")))?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            webhook_secret: env::var("SHOPIFY_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn require_webhook_secret(&self) -> ShopsyncResult<&str> {
        self.webhook_secret.as_deref().ok_or_else(|| {
            ShopsyncError::Config("SHOPIFY_WEBHOOK_SECRET is required but not set".to_owned())
        })
    }
}

fn get_var(key: &str) -> ShopsyncResult<String> {
    env::var(key).map_err(|_| ShopsyncError::Config(format!("{key} is required but not set")))
}

fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an optional numeric env var, falling back to `default` when unset.
/// A value that is set but unparsable is a configuration error.
pub fn parse_var_or<T>(key: &str, default: T) -> ShopsyncResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| ShopsyncError::Config(format!("invalid {key}: {e}"))),
        _ => Ok(default),
    }
}
