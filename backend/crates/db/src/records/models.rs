use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shopsync_common::types::ResourceType;
use uuid::Uuid;

/// Field bag of a record, keyed by field name.
pub type Fields = Map<String, Value>;

/// Local copy of a synchronized entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalRecord {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub fields: Fields,
    /// Last local modification time, compared against the remote `updated_at`.
    pub write_date: DateTime<Utc>,
    /// Cleared on soft deletion, locally or after a remote delete.
    pub active: bool,
    /// Set when a local write asked to propagate to Shopify and the export
    /// (or remote delete, for inactive records) has not happened yet.
    pub pending_export: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LocalRecord {
    pub fn new(resource_type: ResourceType, fields: Fields, write_date: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            resource_type,
            fields,
            write_date,
            active: true,
            pending_export: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Durable link between a local record and its Shopify counterpart.
/// Unique on (external_id, resource_type); never hard-deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalRecordMapping {
    pub id: Uuid,
    pub local_id: Uuid,
    pub external_id: String,
    pub resource_type: ResourceType,
    pub last_synced_at: DateTime<Utc>,
    pub remote_deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExternalRecordMapping {
    pub fn is_remote_deleted(&self) -> bool {
        self.remote_deleted_at.is_some()
    }
}

/// A record whose local deletion must be mirrored remotely.
#[derive(Debug, Clone)]
pub struct PendingDelete {
    pub record: LocalRecord,
    pub mapping: ExternalRecordMapping,
}
