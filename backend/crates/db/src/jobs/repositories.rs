use async_trait::async_trait;
use uuid::Uuid;

use crate::jobs::models::{
    ErrorDetail, JobState, NewSyncJob, SyncJob, SyncJobFilter, SyncStats,
};
use shopsync_common::error::ShopsyncResult;
use shopsync_common::types::ResourceType;

#[async_trait]
pub trait SyncJobRepository: Send + Sync {
    /// Insert a queued job. Fails with `AlreadyRunning` when the resource
    /// type already has a queued, running or canceling job.
    async fn create(&self, job: NewSyncJob) -> ShopsyncResult<SyncJob>;

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>>;

    async fn find_active(&self, resource_type: ResourceType) -> ShopsyncResult<Option<SyncJob>>;

    /// Most recent job for the resource that ended `completed`.
    async fn last_completed(&self, resource_type: ResourceType)
        -> ShopsyncResult<Option<SyncJob>>;

    async fn list(&self, filter: SyncJobFilter) -> ShopsyncResult<Vec<SyncJob>>;

    /// Atomically move a specific job from `queued` to `running`.
    /// Returns `None` if the job is not queued (lock not acquired).
    async fn claim(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>>;

    /// Claim the oldest queued job of any resource type.
    async fn claim_next(&self) -> ShopsyncResult<Option<SyncJob>>;

    /// Persist progress for a running or canceling job and return the fresh
    /// row, so the caller observes a pending cancel request.
    async fn save_checkpoint(
        &self,
        id: Uuid,
        cursor: Option<&str>,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob>;

    /// Request cancellation: `running -> canceling`, `queued -> canceled`.
    async fn request_cancel(&self, id: Uuid) -> ShopsyncResult<SyncJob>;

    /// Move a job into a terminal state. The checkpoint is left untouched.
    async fn finish(
        &self,
        id: Uuid,
        state: JobState,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob>;

    /// Fail every `running` or `canceling` job with `message`, keeping its
    /// checkpoint so it can be resumed. Used when a worker starts, since no
    /// job can be running before it does.
    async fn fail_interrupted(&self, message: &str) -> ShopsyncResult<Vec<SyncJob>>;
}
