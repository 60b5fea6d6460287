use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::webhooks::models::WebhookEvent;
use crate::webhooks::repositories::WebhookEventRepository;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;

const EVENT_COLUMNS: &str =
    "id, topic, resource_type, external_id, payload, received_at, signature_valid, processed_at";

#[derive(Clone)]
pub struct PgWebhookEventRepository {
    pool: PgPool,
}

impl PgWebhookEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> ShopsyncResult<WebhookEvent> {
        let resource_raw: String = row.get("resource_type");
        Ok(WebhookEvent {
            id: row.get("id"),
            topic: row.get("topic"),
            resource_type: ResourceType::from_str(&resource_raw).map_err(ShopsyncError::Internal)?,
            external_id: row.get("external_id"),
            payload: row.get("payload"),
            received_at: row.get("received_at"),
            signature_valid: row.get("signature_valid"),
            processed_at: row.get("processed_at"),
        })
    }
}

#[async_trait]
impl WebhookEventRepository for PgWebhookEventRepository {
    async fn record(&self, event: WebhookEvent) -> ShopsyncResult<WebhookEvent> {
        let sql = format!(
            "insert into webhook_events
             (id, topic, resource_type, external_id, payload, received_at, signature_valid, processed_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8)
             returning {EVENT_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(event.id)
            .bind(&event.topic)
            .bind(event.resource_type.as_str())
            .bind(&event.external_id)
            .bind(&event.payload)
            .bind(event.received_at)
            .bind(event.signature_valid)
            .bind(event.processed_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn pending_deletions(
        &self,
        resource_type: ResourceType,
    ) -> ShopsyncResult<Vec<WebhookEvent>> {
        let sql = format!(
            "select {EVENT_COLUMNS} from webhook_events
             where resource_type = $1 and processed_at is null and topic like '%/delete'
             order by received_at"
        );
        let rows = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> ShopsyncResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("update webhook_events set processed_at = $1 where id = any($2)")
            .bind(at)
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn mark_consumed(
        &self,
        resource_type: ResourceType,
        received_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<u64> {
        let result = sqlx::query(
            "update webhook_events set processed_at = $1
             where resource_type = $2 and processed_at is null
               and received_at <= $3 and topic not like '%/delete'",
        )
        .bind(at)
        .bind(resource_type.as_str())
        .bind(received_until)
        .execute(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn count_unprocessed(&self, resource_type: ResourceType) -> ShopsyncResult<i64> {
        let row = sqlx::query(
            "select count(*) as total from webhook_events
             where resource_type = $1 and processed_at is null",
        )
        .bind(resource_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(row.get("total"))
    }

    async fn purge_processed(&self, before: DateTime<Utc>) -> ShopsyncResult<u64> {
        let result = sqlx::query(
            "delete from webhook_events where processed_at is not null and received_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
