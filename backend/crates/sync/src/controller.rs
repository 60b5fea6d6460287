//! Sync job lifecycle: start, cancel, resume and the run loop itself.
//!
//! A run walks four phases for one resource type:
//!
//! 1. remote deletions recorded from webhooks,
//! 2. paged (or bulk) import reconciled through the conflict resolver,
//! 3. export of local records flagged for propagation,
//! 4. remote deletion of locally deleted records.
//!
//! The checkpoint cursor is persisted after every imported page, together
//! with the stats; the returned row tells the run whether a cancel was
//! requested in the meantime.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::models::{
    ErrorDetail, JobState, NewSyncJob, SkippedRecord, SyncJob, SyncMode, SyncStats,
};
use shopsync_db::jobs::repositories::SyncJobRepository;
use shopsync_db::records::models::LocalRecord;
use shopsync_db::records::repositories::RecordRepository;
use shopsync_db::webhooks::repositories::WebhookEventRepository;
use shopsync_shopify::{ApiErrorKind, ShopifyClientError};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::conflict::{self, Winner};
use crate::resources::{ExternalRecord, ImportPage, ResourceRegistry, ResourceSync};

/// What callers get back when a job is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobHandle {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub mode: SyncMode,
    pub state: JobState,
    pub resumed_from: Option<Uuid>,
}

impl From<&SyncJob> for JobHandle {
    fn from(job: &SyncJob) -> Self {
        Self {
            id: job.id,
            resource_type: job.resource_type,
            mode: job.mode,
            state: job.state,
            resumed_from: job.resumed_from,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Done,
    Canceled,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Mutable progress of one run.
struct Run {
    job: SyncJob,
    cursor: Option<String>,
    stats: SyncStats,
    detail: ErrorDetail,
}

impl Run {
    fn new(job: SyncJob) -> Self {
        Self {
            cursor: job.checkpoint_cursor.clone(),
            stats: job.stats.clone(),
            detail: job.error_detail.clone().unwrap_or_default(),
            job,
        }
    }

    fn skip(&mut self, reference: impl Into<String>, reason: impl Into<String>) {
        let skipped = SkippedRecord {
            reference: reference.into(),
            reason: reason.into(),
        };
        tracing::warn!(
            job_id = %self.job.id,
            reference = %skipped.reference,
            reason = %skipped.reason,
            "record skipped"
        );
        self.stats.skipped += 1;
        self.detail.skipped.push(skipped);
    }
}

const IMPORT_ATTEMPTS: usize = 3;
const MAX_RESUME_CHAIN: usize = 32;

fn describe_failure(phase: &str, err: &ShopifyClientError) -> String {
    let kind = match err.kind() {
        ApiErrorKind::Transient => "transient",
        ApiErrorKind::Validation => "validation",
        ApiErrorKind::Authentication => "authentication",
        ApiErrorKind::Fatal => "fatal",
    };
    format!("{phase} failed ({kind}): {err}")
}

pub struct SyncController<J, R, W> {
    jobs: J,
    records: R,
    events: W,
    resources: ResourceRegistry,
    config: SyncConfig,
}

impl<J, R, W> SyncController<J, R, W>
where
    J: SyncJobRepository,
    R: RecordRepository,
    W: WebhookEventRepository,
{
    pub fn new(jobs: J, records: R, events: W, resources: ResourceRegistry, config: SyncConfig) -> Self {
        Self {
            jobs,
            records,
            events,
            resources,
            config,
        }
    }

    pub fn jobs(&self) -> &J {
        &self.jobs
    }

    pub fn records(&self) -> &R {
        &self.records
    }

    pub fn events(&self) -> &W {
        &self.events
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether jobs may be queued for the resource. Queueing does not need
    /// the Shopify side; running a job does.
    pub fn is_enabled(&self, resource_type: ResourceType) -> bool {
        self.config.resources.contains(&resource_type)
    }

    /// Queue a job. Incremental jobs pin `updated_since` to the start of the
    /// last completed run (or of the run it resumed); the first incremental
    /// run imports everything.
    pub async fn start(&self, resource_type: ResourceType, mode: SyncMode) -> ShopsyncResult<JobHandle> {
        if !self.is_enabled(resource_type) {
            return Err(ShopsyncError::Validation(format!(
                "sync is not enabled for resource '{resource_type}'"
            )));
        }

        let mut new_job = NewSyncJob::new(resource_type, mode);
        if mode == SyncMode::Incremental {
            new_job.updated_since = match self.jobs.last_completed(resource_type).await? {
                Some(job) => self.coverage_start(&job).await?,
                None => None,
            };
        }

        let job = self.jobs.create(new_job).await?;
        tracing::info!(
            job_id = %job.id,
            resource = %resource_type,
            mode = mode.as_str(),
            updated_since = ?job.updated_since,
            "sync job queued"
        );
        Ok(JobHandle::from(&job))
    }

    pub async fn start_full_sync(&self, resource_type: ResourceType) -> ShopsyncResult<JobHandle> {
        self.start(resource_type, SyncMode::Full).await
    }

    pub async fn start_incremental_sync(&self, resource_type: ResourceType) -> ShopsyncResult<JobHandle> {
        self.start(resource_type, SyncMode::Incremental).await
    }

    pub async fn get(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| ShopsyncError::NotFound(format!("sync job not found: {id}")))
    }

    /// Running jobs move to `canceling` and stop at the next page or record
    /// boundary. Queued jobs are canceled immediately.
    pub async fn cancel(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        self.get(id).await?;
        let job = self.jobs.request_cancel(id).await?;
        tracing::info!(job_id = %id, state = %job.state, "sync job cancel requested");
        Ok(job)
    }

    pub async fn cancel_sync(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        self.cancel(id).await
    }

    /// Queue a new job continuing a failed or canceled one from its
    /// checkpoint. The original job stays untouched.
    pub async fn resume(&self, id: Uuid) -> ShopsyncResult<JobHandle> {
        let job = self.get(id).await?;
        if !matches!(job.state, JobState::Failed | JobState::Canceled) {
            return Err(ShopsyncError::InvalidTransition {
                from: job.state.to_string(),
                to: JobState::Queued.to_string(),
            });
        }
        if job.checkpoint_cursor.is_none() {
            return Err(ShopsyncError::Validation(format!(
                "sync job {id} has no checkpoint to resume from"
            )));
        }

        let resumed = self.jobs.create(NewSyncJob::resuming(&job)).await?;
        tracing::info!(
            job_id = %resumed.id,
            resumed_from = %id,
            cursor = ?resumed.checkpoint_cursor,
            "sync job resumed"
        );
        Ok(JobHandle::from(&resumed))
    }

    /// Claim a queued job and run it to a terminal state.
    ///
    /// Sync failures end up in the job row; only persistence errors are
    /// returned.
    pub async fn run(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        match self.jobs.claim(id).await? {
            Some(job) => self.execute(job).await,
            None => {
                let job = self.get(id).await?;
                Err(ShopsyncError::InvalidTransition {
                    from: job.state.to_string(),
                    to: JobState::Running.to_string(),
                })
            }
        }
    }

    /// Claim and run the oldest queued job, if any.
    pub async fn run_next(&self) -> ShopsyncResult<Option<SyncJob>> {
        match self.jobs.claim_next().await? {
            Some(job) => self.execute(job).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drive an already claimed (running) job.
    pub async fn execute(&self, job: SyncJob) -> ShopsyncResult<SyncJob> {
        let id = job.id;
        let resource_type = job.resource_type;
        tracing::info!(
            job_id = %id,
            resource = %resource_type,
            mode = job.mode.as_str(),
            cursor = ?job.checkpoint_cursor,
            "sync job started"
        );

        let mut run = Run::new(job);
        let outcome = match self.resources.get(resource_type) {
            Some(resource) => match self.drive(resource.as_ref(), &mut run).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "sync job aborted");
                    Outcome::Failed(format!("persistence error: {e}"))
                }
            },
            None => Outcome::Failed(format!("no resource sync registered for '{resource_type}'")),
        };

        let finished = self.finish(&mut run, outcome).await?;
        tracing::info!(
            job_id = %id,
            resource = %resource_type,
            state = %finished.state,
            stats = ?finished.stats,
            "sync job finished"
        );

        if finished.state == JobState::Completed {
            if let Err(e) = self.settle_events(&finished).await {
                tracing::warn!(job_id = %id, error = %e, "failed to settle webhook events");
            }
        }
        Ok(finished)
    }

    /// Fail a job whose run could not be finalized, freeing its resource.
    /// The checkpoint is kept for resume.
    pub async fn abandon(&self, id: Uuid, reason: &str) -> ShopsyncResult<SyncJob> {
        let job = self.get(id).await?;
        let mut detail = job.error_detail.clone().unwrap_or_default();
        detail.message = Some(reason.to_string());
        let failed = self
            .jobs
            .finish(id, JobState::Failed, &job.stats, &detail)
            .await?;
        tracing::warn!(job_id = %id, reason, "sync job abandoned");
        Ok(failed)
    }

    /// Instant from which a finished job's import covers remote changes:
    /// its own start, or the start of the earliest run it resumed.
    async fn coverage_start(&self, job: &SyncJob) -> ShopsyncResult<Option<DateTime<Utc>>> {
        let mut start = job.started_at;
        let mut origin = job.resumed_from;
        for _ in 0..MAX_RESUME_CHAIN {
            let Some(id) = origin else { break };
            let Some(previous) = self.jobs.get(id).await? else { break };
            start = match (start, previous.started_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            origin = previous.resumed_from;
        }
        Ok(start)
    }

    /// Mark the webhook events a completed job has applied, and queue a
    /// follow-up incremental run for events that arrived while it ran.
    async fn settle_events(&self, job: &SyncJob) -> ShopsyncResult<()> {
        let resource_type = job.resource_type;
        if let Some(covered_from) = self.coverage_start(job).await? {
            let consumed = self
                .events
                .mark_consumed(resource_type, covered_from, Utc::now())
                .await?;
            if consumed > 0 {
                tracing::debug!(job_id = %job.id, consumed, "webhook events consumed");
            }
        }

        if self.events.count_unprocessed(resource_type).await? == 0 {
            return Ok(());
        }
        match self.start_incremental_sync(resource_type).await {
            Ok(handle) => {
                tracing::info!(
                    job_id = %handle.id,
                    after = %job.id,
                    resource = %resource_type,
                    "follow-up sync queued for webhook events received during the run"
                );
                Ok(())
            }
            Err(ShopsyncError::AlreadyRunning(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn finish(&self, run: &mut Run, outcome: Outcome) -> ShopsyncResult<SyncJob> {
        let id = run.job.id;
        let state = match outcome {
            Outcome::Done => JobState::Completed,
            Outcome::Canceled => JobState::Canceled,
            Outcome::Failed(message) => {
                tracing::error!(job_id = %id, error = %message, "sync job failed");
                run.detail.message = Some(message);
                JobState::Failed
            }
        };

        match self.jobs.finish(id, state, &run.stats, &run.detail).await {
            // A cancel landed after the last boundary check.
            Err(ShopsyncError::InvalidTransition { .. }) if state == JobState::Completed => {
                self.jobs
                    .finish(id, JobState::Canceled, &run.stats, &run.detail)
                    .await
            }
            other => other,
        }
    }

    async fn drive(&self, resource: &dyn ResourceSync, run: &mut Run) -> ShopsyncResult<Outcome> {
        self.apply_remote_deletions(run).await?;
        if self.checkpoint(run).await? {
            return Ok(Outcome::Canceled);
        }

        let outcome = self.import(resource, run).await?;
        if outcome != Outcome::Done {
            return Ok(outcome);
        }

        let outcome = self.export(resource, run).await?;
        if outcome != Outcome::Done {
            return Ok(outcome);
        }

        self.delete_remote(resource, run).await
    }

    /// Persist progress. Returns `true` when the job should stop because a
    /// cancel was requested.
    async fn checkpoint(&self, run: &mut Run) -> ShopsyncResult<bool> {
        let saved = self
            .jobs
            .save_checkpoint(run.job.id, run.cursor.as_deref(), &run.stats, &run.detail)
            .await?;
        let canceling = saved.state == JobState::Canceling;
        run.job = saved;
        if canceling {
            tracing::info!(job_id = %run.job.id, cursor = ?run.cursor, "cancel observed");
        }
        Ok(canceling)
    }

    async fn apply_remote_deletions(&self, run: &mut Run) -> ShopsyncResult<()> {
        let resource_type = run.job.resource_type;
        let events = self.events.pending_deletions(resource_type).await?;
        if events.is_empty() {
            return Ok(());
        }

        let mut processed = Vec::with_capacity(events.len());
        for event in &events {
            if let Some(external_id) = &event.external_id {
                if self
                    .records
                    .mark_remote_deleted(resource_type, external_id, event.received_at)
                    .await?
                {
                    run.stats.deleted += 1;
                }
            }
            processed.push(event.id);
        }
        self.events.mark_processed(&processed, Utc::now()).await?;

        tracing::info!(
            job_id = %run.job.id,
            resource = %resource_type,
            events = processed.len(),
            "applied remote deletions"
        );
        Ok(())
    }

    async fn import(&self, resource: &dyn ResourceSync, run: &mut Run) -> ShopsyncResult<Outcome> {
        let use_bulk = run.job.mode == SyncMode::Full
            && run.cursor.is_none()
            && self.config.use_bulk_for_full
            && resource.bulk_query().is_some();

        if use_bulk {
            let page = match resource.import_bulk().await {
                Ok(page) => page,
                Err(e) => return Ok(Outcome::Failed(describe_failure("bulk import", &e))),
            };
            self.apply_page(page, run).await?;
            run.stats.pages += 1;
            return Ok(if self.checkpoint(run).await? {
                Outcome::Canceled
            } else {
                Outcome::Done
            });
        }

        loop {
            let page = match resource
                .import_page(run.cursor.as_deref(), run.job.updated_since)
                .await
            {
                Ok(page) => page,
                Err(e) => return Ok(Outcome::Failed(describe_failure("import", &e))),
            };

            let has_more = page.has_more;
            let next_cursor = page.next_cursor.clone();
            self.apply_page(page, run).await?;
            run.stats.pages += 1;
            if next_cursor.is_some() {
                run.cursor = next_cursor;
            }

            if self.checkpoint(run).await? {
                return Ok(Outcome::Canceled);
            }
            if !has_more {
                return Ok(Outcome::Done);
            }
            if run.cursor.is_none() {
                tracing::warn!(job_id = %run.job.id, "page reports more results without a cursor");
                return Ok(Outcome::Done);
            }
        }
    }

    async fn apply_page(&self, page: ImportPage, run: &mut Run) -> ShopsyncResult<()> {
        for rejected in page.rejected {
            run.skip(rejected.reference, rejected.reason);
        }

        for external in &page.records {
            match self.import_record(run.job.resource_type, external).await {
                Ok(ImportOutcome::Inserted) => run.stats.imported += 1,
                Ok(ImportOutcome::Updated) => run.stats.updated += 1,
                Ok(ImportOutcome::Unchanged) => run.stats.unchanged += 1,
                Err(ShopsyncError::Validation(reason)) => run.skip(&external.external_id, reason),
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reconcile one remote record with its local copy. Applying the same
    /// remote state twice leaves the second pass `Unchanged`.
    ///
    /// Writes are guarded on the local `write_date` that was read; a local
    /// edit landing in between makes the record reconcile again.
    async fn import_record(
        &self,
        resource_type: ResourceType,
        external: &ExternalRecord,
    ) -> ShopsyncResult<ImportOutcome> {
        for _ in 0..IMPORT_ATTEMPTS {
            let now = Utc::now();
            let mapping = self.records.find_mapping(resource_type, &external.external_id).await?;
            let local = match &mapping {
                Some(m) => self.records.get_record(resource_type, m.local_id).await?,
                None => None,
            };

            let (Some(mapping), Some(local)) = (mapping, local) else {
                let record =
                    LocalRecord::new(resource_type, external.fields.clone(), external.updated_at);
                self.records
                    .save_synced(record, &external.external_id, now, None)
                    .await?;
                return Ok(ImportOutcome::Inserted);
            };

            let resolution = conflict::resolve(&local, external);
            let mut record = local.clone();
            record.fields = resolution.merged;
            if resolution.winner == Winner::External {
                record.write_date = external.updated_at;
                record.active = true;
                record.pending_export = false;
            }

            if record == local && !mapping.is_remote_deleted() {
                self.records.touch_mapping(mapping.id, now).await?;
                return Ok(ImportOutcome::Unchanged);
            }

            record.updated_at = now;
            let saved = self
                .records
                .save_synced(record, &external.external_id, now, Some(local.write_date))
                .await?;
            if saved.is_some() {
                return Ok(ImportOutcome::Updated);
            }
            tracing::debug!(
                external_id = %external.external_id,
                local_id = %local.id,
                "local record changed during import, reconciling again"
            );
        }

        Err(ShopsyncError::Validation(format!(
            "local record kept changing during import after {IMPORT_ATTEMPTS} attempts"
        )))
    }

    async fn export(&self, resource: &dyn ResourceSync, run: &mut Run) -> ShopsyncResult<Outcome> {
        let resource_type = run.job.resource_type;
        let pending = self
            .records
            .pending_exports(resource_type, self.config.export_batch)
            .await?;

        for record in pending {
            if !resource.supports_export() {
                run.skip(
                    record.id.to_string(),
                    format!("{resource_type} records cannot be exported"),
                );
                self.records.clear_pending(resource_type, record.id).await?;
                continue;
            }

            let existing = self
                .records
                .find_mapping_by_local(resource_type, record.id)
                .await?
                .filter(|m| !m.is_remote_deleted());
            let existing_id = existing.as_ref().map(|m| m.external_id.as_str());

            match resource.export(&record, existing_id).await {
                Ok(external_id) => {
                    self.records
                        .confirm_export(
                            record.id,
                            resource_type,
                            &external_id,
                            Utc::now(),
                            record.write_date,
                        )
                        .await?;
                    run.stats.exported += 1;
                }
                Err(e) if e.kind() == ApiErrorKind::Validation => {
                    run.skip(record.id.to_string(), e.to_string());
                }
                Err(e) => return Ok(Outcome::Failed(describe_failure("export", &e))),
            }

            if self.checkpoint(run).await? {
                return Ok(Outcome::Canceled);
            }
        }
        Ok(Outcome::Done)
    }

    async fn delete_remote(&self, resource: &dyn ResourceSync, run: &mut Run) -> ShopsyncResult<Outcome> {
        let resource_type = run.job.resource_type;
        let pending = self
            .records
            .pending_deletes(resource_type, self.config.export_batch)
            .await?;

        for item in pending {
            let external_id = item.mapping.external_id.as_str();
            if !resource.supports_export() {
                run.skip(external_id, format!("{resource_type} records cannot be deleted remotely"));
                self.records.clear_pending(resource_type, item.record.id).await?;
                continue;
            }

            match resource.delete(external_id).await {
                Ok(existed) => {
                    if !existed {
                        tracing::debug!(external_id, "remote record was already gone");
                    }
                    self.records
                        .mark_remote_deleted(resource_type, external_id, Utc::now())
                        .await?;
                    run.stats.deleted += 1;
                }
                Err(e) if e.kind() == ApiErrorKind::Validation => run.skip(external_id, e.to_string()),
                Err(e) => return Ok(Outcome::Failed(describe_failure("remote delete", &e))),
            }

            if self.checkpoint(run).await? {
                return Ok(Outcome::Canceled);
            }
        }
        Ok(Outcome::Done)
    }
}
