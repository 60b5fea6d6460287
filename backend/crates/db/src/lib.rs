pub mod jobs;
pub mod records;
pub mod schema;
pub mod webhooks;

pub use schema::ensure_schema;

use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> ShopsyncResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))
}

/// Pool that connects on first use. Lets the API start (and its tests run)
/// before the database is reachable.
pub fn create_lazy_pool(database_url: &str) -> ShopsyncResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy(database_url)
        .map_err(|e| ShopsyncError::Database(e.to_string()))
}
