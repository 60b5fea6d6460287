use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::records::models::{ExternalRecordMapping, LocalRecord, PendingDelete};
use shopsync_common::error::ShopsyncResult;
use shopsync_common::types::ResourceType;

/// Local records and their external mappings.
///
/// Every method that touches both a record and its mapping does so in one
/// transaction: either both writes land or neither does.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn get_record(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> ShopsyncResult<Option<LocalRecord>>;

    async fn find_mapping(
        &self,
        resource_type: ResourceType,
        external_id: &str,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>>;

    async fn find_mapping_by_local(
        &self,
        resource_type: ResourceType,
        local_id: Uuid,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>>;

    async fn count_mappings(&self, resource_type: ResourceType) -> ShopsyncResult<i64>;

    /// Local write. With `propagate_to_external` the record is queued for
    /// export on the next sync run; without it the write stays local.
    async fn save_local(
        &self,
        record: LocalRecord,
        propagate_to_external: bool,
    ) -> ShopsyncResult<LocalRecord>;

    /// Local soft delete. With `propagate_to_external` a mapped record is
    /// queued for remote deletion.
    async fn delete_local(
        &self,
        resource_type: ResourceType,
        id: Uuid,
        propagate_to_external: bool,
    ) -> ShopsyncResult<()>;

    /// Write an imported record together with its mapping. Creates the
    /// mapping on first sight, otherwise refreshes `last_synced_at` and
    /// clears any remote deletion mark.
    ///
    /// With `expected_write_date` the record is only overwritten while its
    /// stored `write_date` still equals it; `None` is returned when a local
    /// write got there first and nothing was saved.
    async fn save_synced(
        &self,
        record: LocalRecord,
        external_id: &str,
        synced_at: DateTime<Utc>,
        expected_write_date: Option<DateTime<Utc>>,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>>;

    /// Refresh `last_synced_at` for a record that needed no field changes.
    async fn touch_mapping(&self, mapping_id: Uuid, synced_at: DateTime<Utc>)
        -> ShopsyncResult<()>;

    /// Records waiting to be exported (active and `pending_export`).
    async fn pending_exports(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<LocalRecord>>;

    /// Record a successful export: upsert the mapping and clear
    /// `pending_export`. The flag stays set when the record was written
    /// again after the exported version (`exported_write_date`).
    async fn confirm_export(
        &self,
        record_id: Uuid,
        resource_type: ResourceType,
        external_id: &str,
        synced_at: DateTime<Utc>,
        exported_write_date: DateTime<Utc>,
    ) -> ShopsyncResult<ExternalRecordMapping>;

    /// Locally deleted records whose remote counterpart still exists.
    async fn pending_deletes(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<PendingDelete>>;

    /// Soft-mark a mapping as deleted remotely and deactivate its record.
    /// Returns `false` when no mapping exists for the external id.
    async fn mark_remote_deleted(
        &self,
        resource_type: ResourceType,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<bool>;

    /// Drop the pending flag of a record that cannot be propagated.
    async fn clear_pending(&self, resource_type: ResourceType, id: Uuid) -> ShopsyncResult<()>;
}
