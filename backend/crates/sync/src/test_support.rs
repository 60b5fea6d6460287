//! In-memory repositories and a scripted resource for controller and
//! webhook tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::models::{
    ErrorDetail, JobState, NewSyncJob, SyncJob, SyncJobFilter, SyncStats,
};
use shopsync_db::jobs::repositories::SyncJobRepository;
use shopsync_db::records::models::{ExternalRecordMapping, LocalRecord, PendingDelete};
use shopsync_db::records::repositories::RecordRepository;
use shopsync_db::webhooks::models::WebhookEvent;
use shopsync_db::webhooks::repositories::WebhookEventRepository;
use shopsync_shopify::{ShopifyClientError, StatusCode};
use uuid::Uuid;

use crate::resources::{ExternalRecord, ImportPage, ResourceSync};

fn invalid(from: JobState, to: JobState) -> ShopsyncError {
    ShopsyncError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[derive(Clone, Default)]
pub struct MemoryJobs {
    jobs: Arc<Mutex<Vec<SyncJob>>>,
}

impl MemoryJobs {
    pub fn snapshot(&self, id: Uuid) -> SyncJob {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .expect("job exists")
    }

    pub fn all(&self) -> Vec<SyncJob> {
        self.jobs.lock().unwrap().clone()
    }

    /// Insert a job as-is, bypassing the active-job check.
    pub fn insert(&self, job: SyncJob) {
        self.jobs.lock().unwrap().push(job);
    }

    /// Synchronous cancel, for use from inside a scripted resource.
    pub fn cancel_now(&self, id: Uuid) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            if job.state == JobState::Running {
                job.state = JobState::Canceling;
            }
        }
    }
}

#[async_trait]
impl SyncJobRepository for MemoryJobs {
    async fn create(&self, job: NewSyncJob) -> ShopsyncResult<SyncJob> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs
            .iter()
            .any(|j| j.resource_type == job.resource_type && !j.state.is_terminal())
        {
            return Err(ShopsyncError::AlreadyRunning(job.resource_type));
        }
        let job = job.into_job(Uuid::new_v4(), Utc::now());
        jobs.push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        Ok(self.jobs.lock().unwrap().iter().find(|j| j.id == id).cloned())
    }

    async fn find_active(&self, resource_type: ResourceType) -> ShopsyncResult<Option<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.resource_type == resource_type && !j.state.is_terminal())
            .cloned())
    }

    async fn last_completed(
        &self,
        resource_type: ResourceType,
    ) -> ShopsyncResult<Option<SyncJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.resource_type == resource_type && j.state == JobState::Completed)
            .max_by_key(|j| j.finished_at)
            .cloned())
    }

    async fn list(&self, filter: SyncJobFilter) -> ShopsyncResult<Vec<SyncJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| filter.resource_type.map_or(true, |rt| j.resource_type == rt))
            .filter(|j| filter.state.map_or(true, |s| j.state == s))
            .cloned()
            .collect();
        jobs.reverse();
        jobs.truncate(filter.limit.unwrap_or(50) as usize);
        Ok(jobs)
    }

    async fn claim(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == id && j.state == JobState::Queued) {
            Some(job) => {
                job.state = JobState::Running;
                job.started_at = Some(Utc::now());
                Ok(Some(job.clone()))
            }
            None => Ok(None),
        }
    }

    async fn claim_next(&self) -> ShopsyncResult<Option<SyncJob>> {
        let next = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.state == JobState::Queued)
            .map(|j| j.id);
        match next {
            Some(id) => self.claim(id).await,
            None => Ok(None),
        }
    }

    async fn save_checkpoint(
        &self,
        id: Uuid,
        cursor: Option<&str>,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id && matches!(j.state, JobState::Running | JobState::Canceling))
            .ok_or_else(|| ShopsyncError::NotFound(format!("running sync job not found: {id}")))?;
        if let Some(cursor) = cursor {
            job.checkpoint_cursor = Some(cursor.to_string());
        }
        job.stats = stats.clone();
        job.error_detail = (!detail.is_empty()).then(|| detail.clone());
        Ok(job.clone())
    }

    async fn request_cancel(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ShopsyncError::NotFound(format!("sync job not found: {id}")))?;
        match job.state {
            JobState::Running => job.state = JobState::Canceling,
            JobState::Queued => {
                job.state = JobState::Canceled;
                job.finished_at = Some(Utc::now());
            }
            other => return Err(invalid(other, JobState::Canceling)),
        }
        Ok(job.clone())
    }

    async fn finish(
        &self,
        id: Uuid,
        state: JobState,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| ShopsyncError::NotFound(format!("sync job not found: {id}")))?;
        if !state.is_terminal() || !job.state.can_transition_to(state) {
            return Err(invalid(job.state, state));
        }
        job.state = state;
        job.stats = stats.clone();
        job.error_detail = (!detail.is_empty()).then(|| detail.clone());
        job.finished_at = Some(Utc::now());
        Ok(job.clone())
    }

    async fn fail_interrupted(&self, message: &str) -> ShopsyncResult<Vec<SyncJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let mut failed = Vec::new();
        for job in jobs
            .iter_mut()
            .filter(|j| matches!(j.state, JobState::Running | JobState::Canceling))
        {
            let mut detail = job.error_detail.clone().unwrap_or_default();
            detail.message = Some(message.to_string());
            job.state = JobState::Failed;
            job.error_detail = Some(detail);
            job.finished_at = Some(now);
            failed.push(job.clone());
        }
        Ok(failed)
    }
}

#[derive(Default)]
struct RecordStore {
    records: HashMap<Uuid, LocalRecord>,
    mappings: Vec<ExternalRecordMapping>,
}

impl RecordStore {
    fn upsert_mapping(
        &mut self,
        local_id: Uuid,
        resource_type: ResourceType,
        external_id: &str,
        synced_at: DateTime<Utc>,
    ) -> ExternalRecordMapping {
        if let Some(m) = self
            .mappings
            .iter_mut()
            .find(|m| m.resource_type == resource_type && m.external_id == external_id)
        {
            m.local_id = local_id;
            m.last_synced_at = synced_at;
            m.remote_deleted_at = None;
            return m.clone();
        }
        let mapping = ExternalRecordMapping {
            id: Uuid::new_v4(),
            local_id,
            external_id: external_id.to_string(),
            resource_type,
            last_synced_at: synced_at,
            remote_deleted_at: None,
            created_at: Utc::now(),
        };
        self.mappings.push(mapping.clone());
        mapping
    }
}

#[derive(Clone, Default)]
pub struct MemoryRecords {
    store: Arc<Mutex<RecordStore>>,
    interleaved: Arc<Mutex<Option<LocalRecord>>>,
}

impl MemoryRecords {
    /// Apply `record` as a propagating local write right before the next
    /// guarded `save_synced`, as if a user saved it mid-import.
    pub fn interleave_local_write(&self, record: LocalRecord) {
        *self.interleaved.lock().unwrap() = Some(record);
    }

    pub fn records(&self, resource_type: ResourceType) -> Vec<LocalRecord> {
        self.store
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.resource_type == resource_type)
            .cloned()
            .collect()
    }

    pub fn mappings(&self, resource_type: ResourceType) -> Vec<ExternalRecordMapping> {
        self.store
            .lock()
            .unwrap()
            .mappings
            .iter()
            .filter(|m| m.resource_type == resource_type)
            .cloned()
            .collect()
    }

    pub fn record_for(&self, resource_type: ResourceType, external_id: &str) -> Option<LocalRecord> {
        let store = self.store.lock().unwrap();
        let mapping = store
            .mappings
            .iter()
            .find(|m| m.resource_type == resource_type && m.external_id == external_id)?;
        store.records.get(&mapping.local_id).cloned()
    }

    /// Seed a record with its mapping as if a previous sync had written it.
    pub fn seed(&self, record: LocalRecord, external_id: &str) {
        let mut store = self.store.lock().unwrap();
        store.upsert_mapping(record.id, record.resource_type, external_id, Utc::now());
        store.records.insert(record.id, record);
    }
}

#[async_trait]
impl RecordRepository for MemoryRecords {
    async fn get_record(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> ShopsyncResult<Option<LocalRecord>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .records
            .get(&id)
            .filter(|r| r.resource_type == resource_type)
            .cloned())
    }

    async fn find_mapping(
        &self,
        resource_type: ResourceType,
        external_id: &str,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .mappings
            .iter()
            .find(|m| m.resource_type == resource_type && m.external_id == external_id)
            .cloned())
    }

    async fn find_mapping_by_local(
        &self,
        resource_type: ResourceType,
        local_id: Uuid,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        Ok(self
            .store
            .lock()
            .unwrap()
            .mappings
            .iter()
            .find(|m| m.resource_type == resource_type && m.local_id == local_id)
            .cloned())
    }

    async fn count_mappings(&self, resource_type: ResourceType) -> ShopsyncResult<i64> {
        Ok(self.mappings(resource_type).len() as i64)
    }

    async fn save_local(
        &self,
        mut record: LocalRecord,
        propagate_to_external: bool,
    ) -> ShopsyncResult<LocalRecord> {
        record.write_date = Utc::now();
        record.pending_export = propagate_to_external;
        self.store
            .lock()
            .unwrap()
            .records
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn delete_local(
        &self,
        resource_type: ResourceType,
        id: Uuid,
        propagate_to_external: bool,
    ) -> ShopsyncResult<()> {
        let mut store = self.store.lock().unwrap();
        let record = store
            .records
            .get_mut(&id)
            .filter(|r| r.resource_type == resource_type)
            .ok_or_else(|| ShopsyncError::NotFound(format!("{resource_type} record not found: {id}")))?;
        record.active = false;
        record.pending_export = propagate_to_external;
        record.write_date = Utc::now();
        Ok(())
    }

    async fn save_synced(
        &self,
        record: LocalRecord,
        external_id: &str,
        synced_at: DateTime<Utc>,
        expected_write_date: Option<DateTime<Utc>>,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        let mut store = self.store.lock().unwrap();
        if expected_write_date.is_some() {
            if let Some(mut edit) = self.interleaved.lock().unwrap().take() {
                edit.write_date = Utc::now();
                edit.pending_export = true;
                store.records.insert(edit.id, edit);
            }
        }
        if let Some(expected) = expected_write_date {
            match store.records.get(&record.id) {
                Some(current) if current.write_date == expected => {}
                _ => return Ok(None),
            }
        }
        let mapping =
            store.upsert_mapping(record.id, record.resource_type, external_id, synced_at);
        store.records.insert(record.id, record);
        Ok(Some(mapping))
    }

    async fn touch_mapping(&self, mapping_id: Uuid, synced_at: DateTime<Utc>) -> ShopsyncResult<()> {
        let mut store = self.store.lock().unwrap();
        if let Some(m) = store.mappings.iter_mut().find(|m| m.id == mapping_id) {
            m.last_synced_at = synced_at;
        }
        Ok(())
    }

    async fn pending_exports(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<LocalRecord>> {
        let mut pending: Vec<_> = self
            .records(resource_type)
            .into_iter()
            .filter(|r| r.active && r.pending_export)
            .collect();
        pending.sort_by_key(|r| r.write_date);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn confirm_export(
        &self,
        record_id: Uuid,
        resource_type: ResourceType,
        external_id: &str,
        synced_at: DateTime<Utc>,
        exported_write_date: DateTime<Utc>,
    ) -> ShopsyncResult<ExternalRecordMapping> {
        let mut store = self.store.lock().unwrap();
        let record = store
            .records
            .get_mut(&record_id)
            .ok_or_else(|| ShopsyncError::NotFound(format!("record not found: {record_id}")))?;
        if record.write_date == exported_write_date {
            record.pending_export = false;
        }
        Ok(store.upsert_mapping(record_id, resource_type, external_id, synced_at))
    }

    async fn pending_deletes(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<PendingDelete>> {
        let store = self.store.lock().unwrap();
        let mut pending: Vec<_> = store
            .mappings
            .iter()
            .filter(|m| m.resource_type == resource_type && m.remote_deleted_at.is_none())
            .filter_map(|m| {
                let record = store.records.get(&m.local_id)?;
                (!record.active && record.pending_export).then(|| PendingDelete {
                    record: record.clone(),
                    mapping: m.clone(),
                })
            })
            .collect();
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn mark_remote_deleted(
        &self,
        resource_type: ResourceType,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<bool> {
        let mut store = self.store.lock().unwrap();
        let Some(mapping) = store
            .mappings
            .iter_mut()
            .find(|m| m.resource_type == resource_type && m.external_id == external_id)
        else {
            return Ok(false);
        };
        mapping.remote_deleted_at.get_or_insert(at);
        let local_id = mapping.local_id;
        if let Some(record) = store.records.get_mut(&local_id) {
            record.active = false;
            record.pending_export = false;
        }
        Ok(true)
    }

    async fn clear_pending(&self, _resource_type: ResourceType, id: Uuid) -> ShopsyncResult<()> {
        if let Some(record) = self.store.lock().unwrap().records.get_mut(&id) {
            record.pending_export = false;
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryEvents {
    events: Arc<Mutex<Vec<WebhookEvent>>>,
    record_delay: Option<std::time::Duration>,
}

impl MemoryEvents {
    /// Store whose `record` takes `delay`, like a saturated database.
    pub fn slow(delay: std::time::Duration) -> Self {
        Self {
            record_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn all(&self) -> Vec<WebhookEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Synchronous insert, for use from inside a scripted resource.
    pub fn push(&self, event: WebhookEvent) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl WebhookEventRepository for MemoryEvents {
    async fn record(&self, event: WebhookEvent) -> ShopsyncResult<WebhookEvent> {
        if let Some(delay) = self.record_delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(event)
    }

    async fn pending_deletions(
        &self,
        resource_type: ResourceType,
    ) -> ShopsyncResult<Vec<WebhookEvent>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|e| e.resource_type == resource_type && e.is_deletion())
            .filter(|e| e.processed_at.is_none())
            .collect())
    }

    async fn mark_processed(&self, ids: &[Uuid], at: DateTime<Utc>) -> ShopsyncResult<()> {
        for event in self.events.lock().unwrap().iter_mut() {
            if ids.contains(&event.id) {
                event.processed_at = Some(at);
            }
        }
        Ok(())
    }

    async fn mark_consumed(
        &self,
        resource_type: ResourceType,
        received_until: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<u64> {
        let mut consumed = 0;
        for event in self.events.lock().unwrap().iter_mut().filter(|e| {
            e.resource_type == resource_type
                && e.processed_at.is_none()
                && e.received_at <= received_until
                && !e.is_deletion()
        }) {
            event.processed_at = Some(at);
            consumed += 1;
        }
        Ok(consumed)
    }

    async fn count_unprocessed(&self, resource_type: ResourceType) -> ShopsyncResult<i64> {
        Ok(self
            .all()
            .iter()
            .filter(|e| e.resource_type == resource_type && e.processed_at.is_none())
            .count() as i64)
    }

    async fn purge_processed(&self, before: DateTime<Utc>) -> ShopsyncResult<u64> {
        let mut events = self.events.lock().unwrap();
        let len = events.len();
        events.retain(|e| e.processed_at.map_or(true, |_| e.received_at >= before));
        Ok((len - events.len()) as u64)
    }
}

/// Fixed timestamp used for remote records in tests.
pub fn remote_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn product(n: usize) -> ExternalRecord {
    ExternalRecord {
        external_id: format!("gid://shopify/Product/{n}"),
        updated_at: remote_time() + Duration::minutes(n as i64),
        fields: json!({ "title": format!("Product {n}") })
            .as_object()
            .cloned()
            .unwrap(),
    }
}

/// How a scripted call should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Transient,
    Auth,
    Validation,
}

impl Failure {
    fn error(self) -> ShopifyClientError {
        match self {
            Self::Transient => ShopifyClientError::MaxRetriesExceeded {
                attempts: 4,
                last_error: "HTTP 503".to_string(),
            },
            Self::Auth => ShopifyClientError::Authentication {
                status: StatusCode::UNAUTHORIZED,
                body: "Invalid API key or access token".to_string(),
            },
            Self::Validation => ShopifyClientError::Validation("Title can't be blank".to_string()),
        }
    }
}

type PageHook = Box<dyn Fn(usize) + Send + Sync>;

/// Resource serving fixed pages. Page `i` is served for cursor `None`
/// (`i == 0`) or `Some("c{i}")`; its next cursor is `c{i+1}`.
pub struct ScriptedResource {
    resource_type: ResourceType,
    pages: Vec<Vec<ExternalRecord>>,
    exportable: bool,
    page_failures: Mutex<HashMap<usize, Failure>>,
    export_failures: Mutex<HashMap<Uuid, Failure>>,
    on_page: Mutex<Option<PageHook>>,
    pub requested: Mutex<Vec<Option<String>>>,
    pub exported: Mutex<Vec<(Uuid, Option<String>)>>,
    pub deleted: Mutex<Vec<String>>,
    pub bulk_calls: Mutex<usize>,
}

impl ScriptedResource {
    pub fn new(resource_type: ResourceType, pages: Vec<Vec<ExternalRecord>>) -> Self {
        Self {
            resource_type,
            pages,
            exportable: resource_type != ResourceType::Order,
            page_failures: Mutex::default(),
            export_failures: Mutex::default(),
            on_page: Mutex::default(),
            requested: Mutex::default(),
            exported: Mutex::default(),
            deleted: Mutex::default(),
            bulk_calls: Mutex::default(),
        }
    }

    pub fn fail_page(&self, index: usize, failure: Failure) {
        self.page_failures.lock().unwrap().insert(index, failure);
    }

    pub fn heal_page(&self, index: usize) {
        self.page_failures.lock().unwrap().remove(&index);
    }

    pub fn fail_export(&self, record_id: Uuid, failure: Failure) {
        self.export_failures.lock().unwrap().insert(record_id, failure);
    }

    /// Run `hook(i)` whenever page `i` is served.
    pub fn on_page(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *self.on_page.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn requested_cursors(&self) -> Vec<Option<String>> {
        self.requested.lock().unwrap().clone()
    }

    fn page_index(cursor: Option<&str>) -> usize {
        cursor
            .and_then(|c| c.strip_prefix('c'))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ResourceSync for ScriptedResource {
    fn resource_type(&self) -> ResourceType {
        self.resource_type
    }

    fn supports_export(&self) -> bool {
        self.exportable
    }

    async fn import_page(
        &self,
        cursor: Option<&str>,
        updated_since: Option<DateTime<Utc>>,
    ) -> Result<ImportPage, ShopifyClientError> {
        self.requested.lock().unwrap().push(cursor.map(str::to_string));
        let index = Self::page_index(cursor);
        if let Some(failure) = self.page_failures.lock().unwrap().get(&index) {
            return Err(failure.error());
        }
        if let Some(hook) = self.on_page.lock().unwrap().as_ref() {
            hook(index);
        }

        let records = self
            .pages
            .get(index)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|r| updated_since.map_or(true, |since| r.updated_at >= since))
            .collect();
        let has_more = index + 1 < self.pages.len();
        Ok(ImportPage {
            records,
            rejected: Vec::new(),
            next_cursor: has_more.then(|| format!("c{}", index + 1)),
            has_more,
        })
    }

    async fn export(
        &self,
        record: &LocalRecord,
        existing_external_id: Option<&str>,
    ) -> Result<String, ShopifyClientError> {
        if let Some(failure) = self.export_failures.lock().unwrap().get(&record.id) {
            return Err(failure.error());
        }
        self.exported
            .lock()
            .unwrap()
            .push((record.id, existing_external_id.map(str::to_string)));
        Ok(existing_external_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("gid://shopify/Product/new-{}", record.id)))
    }

    async fn delete(&self, external_id: &str) -> Result<bool, ShopifyClientError> {
        self.deleted.lock().unwrap().push(external_id.to_string());
        Ok(true)
    }

    async fn import_bulk(&self) -> Result<ImportPage, ShopifyClientError> {
        *self.bulk_calls.lock().unwrap() += 1;
        Ok(ImportPage {
            records: self.pages.iter().flatten().cloned().collect(),
            ..ImportPage::default()
        })
    }
}
