use std::sync::Arc;

use shopsync_config::{init_tracing, AppConfig};
use shopsync_db::jobs::pg_repository::PgSyncJobRepository;
use shopsync_db::records::pg_repository::PgRecordRepository;
use shopsync_db::webhooks::pg_repository::PgWebhookEventRepository;
use shopsync_shopify::{ShopifyClient, ShopifyClientConfig};
use shopsync_sync::{ResourceRegistry, SyncConfig, SyncController, SyncWorker};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() {
    init_tracing("info");

    let config = AppConfig::from_env().expect("failed to load config");
    let sync_config = SyncConfig::from_env().expect("failed to load sync config");

    tracing::info!(service = "shopsync-worker", resources = ?sync_config.resources, "starting");

    // Credentials present but malformed is a deployment error: fail fast.
    let shopify_config = match ShopifyClientConfig::from_env() {
        Ok(Some(cfg)) => cfg,
        Ok(None) => {
            tracing::error!("SHOPIFY_SHOP_DOMAIN and SHOPIFY_ACCESS_TOKEN must be set");
            std::process::exit(1);
        }
        Err(e) => panic!("Shopify configuration error (fail-fast): {e}"),
    };
    tracing::info!(
        shop = %shopify_config.base_url,
        api_version = %shopify_config.api_version,
        "shopify client configured"
    );

    let client = ShopifyClient::new(shopify_config).expect("failed to build Shopify client");
    let registry = ResourceRegistry::shopify(&client, sync_config.page_size, &sync_config.resources);

    let pool = shopsync_db::create_pool(&config.database_url)
        .await
        .expect("failed to create database pool");
    shopsync_db::ensure_schema(&pool)
        .await
        .expect("failed to apply database schema");

    let controller = Arc::new(SyncController::new(
        PgSyncJobRepository::new(pool.clone()),
        PgRecordRepository::new(pool.clone()),
        PgWebhookEventRepository::new(pool),
        registry,
        sync_config,
    ));

    SyncWorker::new(controller).run(shutdown_signal()).await;

    tracing::info!(service = "shopsync-worker", "done");
}
