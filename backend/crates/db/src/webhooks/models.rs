use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopsync_common::types::ResourceType;
use uuid::Uuid;

/// Accepted inbound notification, kept for audit and for deferred deletions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub topic: String,
    pub resource_type: ResourceType,
    pub external_id: Option<String>,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub signature_valid: bool,
    pub processed_at: Option<DateTime<Utc>>,
}

impl WebhookEvent {
    /// `products/delete`, `customers/delete`, ...
    pub fn is_deletion(&self) -> bool {
        self.topic.ends_with("/delete")
    }
}
