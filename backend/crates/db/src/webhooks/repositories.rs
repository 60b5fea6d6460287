use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::webhooks::models::WebhookEvent;
use shopsync_common::error::ShopsyncResult;
use shopsync_common::types::ResourceType;

#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    async fn record(&self, event: WebhookEvent) -> ShopsyncResult<WebhookEvent>;

    /// Unprocessed deletion events for a resource, oldest first.
    async fn pending_deletions(
        &self,
        resource_type: ResourceType,
    ) -> ShopsyncResult<Vec<WebhookEvent>>;

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> ShopsyncResult<()>;

    /// Mark unprocessed non-deletion events received up to `received_until`
    /// as processed. A completed import covering that instant has applied
    /// them. Returns rows updated.
    async fn mark_consumed(
        &self,
        resource_type: ResourceType,
        received_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<u64>;

    async fn count_unprocessed(&self, resource_type: ResourceType) -> ShopsyncResult<i64>;

    /// Delete processed events received before `before`. Returns rows removed.
    async fn purge_processed(&self, before: DateTime<Utc>) -> ShopsyncResult<u64>;
}
