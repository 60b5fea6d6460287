//! Inbound Shopify webhooks.
//!
//! Every delivery is authenticated with the shared secret (base64
//! HMAC-SHA256 of the raw body). Authentic events for a known topic are
//! stored and turned into an incremental sync of the matching resource.

use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::repositories::SyncJobRepository;
use shopsync_db::records::repositories::RecordRepository;
use shopsync_db::webhooks::models::WebhookEvent;
use shopsync_db::webhooks::repositories::WebhookEventRepository;
use uuid::Uuid;

use crate::controller::SyncController;
use crate::resources::gid;

type HmacSha256 = Hmac<Sha256>;

/// Shopify drops the delivery after five seconds; answer well before that.
const DEFAULT_DEADLINE: std::time::Duration = std::time::Duration::from_secs(3);

const TOPIC_ROUTES: &[(&str, ResourceType)] = &[
    ("products/create", ResourceType::Product),
    ("products/update", ResourceType::Product),
    ("products/delete", ResourceType::Product),
    ("customers/create", ResourceType::Customer),
    ("customers/update", ResourceType::Customer),
    ("customers/delete", ResourceType::Customer),
    ("customers/enable", ResourceType::Customer),
    ("customers/disable", ResourceType::Customer),
    ("orders/create", ResourceType::Order),
    ("orders/updated", ResourceType::Order),
    ("orders/paid", ResourceType::Order),
    ("orders/cancelled", ResourceType::Order),
    ("orders/fulfilled", ResourceType::Order),
    ("orders/delete", ResourceType::Order),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    InvalidSignature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "disposition", content = "job_id")]
pub enum WebhookDisposition {
    /// A new incremental job was queued.
    Triggered(Uuid),
    /// A job for the resource was already active.
    Coalesced,
    /// Topic not routed to an enabled resource.
    Ignored,
    /// Storing the event or queueing the job failed; acknowledged anyway.
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Accepted(WebhookDisposition),
    Rejected(RejectReason),
}

pub fn resource_for_topic(topic: &str) -> Option<ResourceType> {
    let topic = topic.trim().to_ascii_lowercase();
    TOPIC_ROUTES
        .iter()
        .find(|(name, _)| *name == topic)
        .map(|(_, resource_type)| *resource_type)
}

/// Constant-time check of the `X-Shopify-Hmac-Sha256` header.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = BASE64_STANDARD.decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Global id of the record a payload is about. Webhook payloads carry the
/// REST id and, for most topics, `admin_graphql_api_id`.
pub fn external_id_from_payload(resource_type: ResourceType, payload: &Value) -> Option<String> {
    if let Some(gid) = payload.get("admin_graphql_api_id").and_then(Value::as_str) {
        return Some(gid.to_string());
    }
    match payload.get("id")? {
        Value::Number(n) => Some(gid(resource_type, &n.to_string())),
        Value::String(s) if s.starts_with("gid://") => Some(s.clone()),
        Value::String(s) if !s.is_empty() => Some(gid(resource_type, s)),
        _ => None,
    }
}

pub struct WebhookRouter<J, R, W> {
    controller: Arc<SyncController<J, R, W>>,
    secret: Vec<u8>,
    deadline: std::time::Duration,
}

impl<J, R, W> WebhookRouter<J, R, W>
where
    J: SyncJobRepository,
    R: RecordRepository,
    W: WebhookEventRepository,
{
    pub fn new(controller: Arc<SyncController<J, R, W>>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            controller,
            secret: secret.into(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    /// Bound on storing the event and queueing the job. Past it the delivery
    /// is acknowledged as `Deferred`.
    pub fn with_deadline(mut self, deadline: std::time::Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub async fn handle(&self, topic: &str, payload: &[u8], signature: &str) -> WebhookOutcome {
        if !verify_signature(&self.secret, payload, signature) {
            tracing::warn!(topic, "webhook rejected: invalid signature");
            return WebhookOutcome::Rejected(RejectReason::InvalidSignature);
        }

        let resource_type = match resource_for_topic(topic) {
            Some(rt) if self.controller.is_enabled(rt) => rt,
            _ => {
                tracing::debug!(topic, "webhook ignored: topic not routed");
                return WebhookOutcome::Accepted(WebhookDisposition::Ignored);
            }
        };

        let body: Value = serde_json::from_slice(payload).unwrap_or_else(|e| {
            tracing::warn!(topic, error = %e, "webhook payload is not JSON");
            Value::Null
        });
        let event = WebhookEvent {
            id: Uuid::new_v4(),
            topic: topic.trim().to_ascii_lowercase(),
            resource_type,
            external_id: external_id_from_payload(resource_type, &body),
            payload: body,
            received_at: Utc::now(),
            signature_valid: true,
            processed_at: None,
        };
        match tokio::time::timeout(self.deadline, self.accept(event)).await {
            Ok(disposition) => WebhookOutcome::Accepted(disposition),
            Err(_) => {
                tracing::warn!(
                    topic,
                    deadline_ms = self.deadline.as_millis() as u64,
                    "webhook acknowledged before it was stored"
                );
                WebhookOutcome::Accepted(WebhookDisposition::Deferred)
            }
        }
    }

    async fn accept(&self, event: WebhookEvent) -> WebhookDisposition {
        let topic = event.topic.clone();
        let resource_type = event.resource_type;
        let external_id = event.external_id.clone();

        if let Err(e) = self.controller.events().record(event).await {
            tracing::error!(topic = %topic, error = %e, "failed to store webhook event");
            return WebhookDisposition::Deferred;
        }

        let disposition = match self.controller.start_incremental_sync(resource_type).await {
            Ok(handle) => WebhookDisposition::Triggered(handle.id),
            Err(ShopsyncError::AlreadyRunning(_)) => WebhookDisposition::Coalesced,
            Err(e) => {
                tracing::error!(topic = %topic, error = %e, "failed to queue sync from webhook");
                WebhookDisposition::Deferred
            }
        };

        tracing::info!(
            topic = %topic,
            resource = %resource_type,
            external_id = ?external_id,
            disposition = ?disposition,
            "webhook accepted"
        );
        disposition
    }

    /// Drop processed events older than `older_than`.
    pub async fn purge_processed(&self, older_than: Duration) -> ShopsyncResult<u64> {
        let removed = self
            .controller
            .events()
            .purge_processed(Utc::now() - older_than)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "purged processed webhook events");
        }
        Ok(removed)
    }
}
