mod error;
mod extractors;
mod sync;
mod webhooks;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use shopsync_common::types::ServiceInfo;
use shopsync_config::{init_tracing, AppConfig};
use shopsync_db::jobs::pg_repository::PgSyncJobRepository;
use shopsync_db::records::pg_repository::PgRecordRepository;
use shopsync_db::webhooks::pg_repository::PgWebhookEventRepository;
use shopsync_sync::{ResourceRegistry, SyncConfig, SyncController, WebhookRouter};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;

pub type Controller =
    SyncController<PgSyncJobRepository, PgRecordRepository, PgWebhookEventRepository>;
pub type Webhooks =
    WebhookRouter<PgSyncJobRepository, PgRecordRepository, PgWebhookEventRepository>;

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<Controller>,
    pub webhooks: Arc<Webhooks>,
}

impl AppState {
    /// The API only queues and inspects jobs; the worker runs them, so no
    /// Shopify resources are registered here.
    pub fn new(pool: PgPool, sync_config: SyncConfig, webhook_secret: &str) -> Self {
        let controller = Arc::new(SyncController::new(
            PgSyncJobRepository::new(pool.clone()),
            PgRecordRepository::new(pool.clone()),
            PgWebhookEventRepository::new(pool),
            ResourceRegistry::new(),
            sync_config,
        ));
        let webhooks = Arc::new(WebhookRouter::new(controller.clone(), webhook_secret));
        Self {
            controller,
            webhooks,
        }
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("shopsync-api"))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(webhooks::router())
        .merge(sync::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    let sync_config = SyncConfig::from_env().expect("failed to load sync config");
    let secret = config
        .require_webhook_secret()
        .expect("webhook secret is required")
        .to_string();
    tracing::info!(service = "shopsync-api", resources = ?sync_config.resources, "starting");

    let pool = shopsync_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    shopsync_db::ensure_schema(&pool)
        .await
        .expect("failed to apply database schema");

    let app = build_router(AppState::new(pool, sync_config, &secret));
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
