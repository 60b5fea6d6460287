//! Background loop: claims queued jobs, runs each on its own task, fires the
//! scheduled incremental trigger and trims old webhook events.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_db::jobs::repositories::SyncJobRepository;
use shopsync_db::records::repositories::RecordRepository;
use shopsync_db::webhooks::repositories::WebhookEventRepository;
use tokio::task::JoinSet;
use tokio::time::{interval, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::controller::{JobHandle, SyncController};

const PURGE_INTERVAL: Duration = Duration::from_secs(3600);
const INTERRUPTED: &str = "interrupted: worker stopped before the job finished";

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub struct SyncWorker<J, R, W> {
    controller: Arc<SyncController<J, R, W>>,
    active: HashSet<Uuid>,
    tasks: JoinSet<Uuid>,
}

impl<J, R, W> SyncWorker<J, R, W>
where
    J: SyncJobRepository + 'static,
    R: RecordRepository + 'static,
    W: WebhookEventRepository + 'static,
{
    pub fn new(controller: Arc<SyncController<J, R, W>>) -> Self {
        Self {
            controller,
            active: HashSet::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Jobs currently running on this worker.
    pub fn active_jobs(&self) -> usize {
        self.active.len()
    }

    /// Claim every queued job and spawn it. Jobs of different resource types
    /// run concurrently; the one-active-job rule keeps each type serial.
    pub async fn dispatch(&mut self) -> ShopsyncResult<usize> {
        let mut spawned = 0;
        while let Some(job) = self.controller.jobs().claim_next().await? {
            let controller = self.controller.clone();
            let id = job.id;
            self.active.insert(id);
            self.tasks.spawn(async move {
                if let Err(e) = controller.execute(job).await {
                    tracing::error!(job_id = %id, error = %e, "sync job could not be finalized");
                    let reason = format!("sync aborted: {e}");
                    if let Err(e) = controller.abandon(id, &reason).await {
                        tracing::error!(
                            job_id = %id,
                            error = %e,
                            "job left active; it is failed on the next worker start"
                        );
                    }
                }
                id
            });
            spawned += 1;
        }
        if spawned > 0 {
            tracing::debug!(spawned, active = self.active.len(), "dispatched sync jobs");
        }
        Ok(spawned)
    }

    /// Fail jobs a previous worker left `running` or `canceling`. Their
    /// checkpoints survive, so they can be resumed. Assumes one worker per
    /// database.
    pub async fn recover(&self) -> ShopsyncResult<usize> {
        let failed = self.controller.jobs().fail_interrupted(INTERRUPTED).await?;
        for job in &failed {
            tracing::warn!(
                job_id = %job.id,
                resource = %job.resource_type,
                cursor = ?job.checkpoint_cursor,
                "interrupted sync job marked failed"
            );
        }
        Ok(failed.len())
    }

    /// Wait for every spawned job to finish.
    pub async fn drain(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            self.reap(result);
        }
    }

    fn reap(&mut self, result: Result<Uuid, tokio::task::JoinError>) {
        match result {
            Ok(id) => {
                self.active.remove(&id);
            }
            Err(e) => tracing::error!(error = %e, "sync task panicked"),
        }
    }

    /// Queue an incremental sync for every enabled resource that has no
    /// active job.
    pub async fn trigger_scheduled(&self) -> Vec<JobHandle> {
        let mut queued = Vec::new();
        for resource_type in &self.controller.config().resources {
            match self.controller.start_incremental_sync(*resource_type).await {
                Ok(handle) => queued.push(handle),
                Err(ShopsyncError::AlreadyRunning(_)) => {
                    tracing::debug!(resource = %resource_type, "scheduled sync skipped, job active");
                }
                Err(e) => {
                    tracing::warn!(resource = %resource_type, error = %e, "scheduled sync failed to queue");
                }
            }
        }
        queued
    }

    pub async fn purge_events(&self) -> ShopsyncResult<u64> {
        let retention = chrono::Duration::days(self.controller.config().webhook_retention_days);
        let removed = self
            .controller
            .events()
            .purge_processed(Utc::now() - retention)
            .await?;
        if removed > 0 {
            tracing::info!(removed, "purged processed webhook events");
        }
        Ok(removed)
    }

    /// Run until `shutdown` resolves. Jobs still running at shutdown are
    /// asked to cancel, which leaves them resumable, and awaited.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let config = self.controller.config().clone();
        let mut poll = interval(Duration::from_secs(config.worker_poll_interval_secs.max(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut schedule = (config.schedule_interval_secs > 0).then(|| {
            let mut timer = interval(Duration::from_secs(config.schedule_interval_secs));
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer
        });
        let mut purge = interval(PURGE_INTERVAL);

        tracing::info!(
            poll_secs = config.worker_poll_interval_secs,
            schedule_secs = config.schedule_interval_secs,
            resources = ?config.resources,
            "worker started"
        );

        if let Err(e) = self.recover().await {
            tracing::error!(error = %e, "failed to recover interrupted jobs");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = poll.tick() => {
                    if let Err(e) = self.dispatch().await {
                        tracing::error!(error = %e, "failed to claim queued jobs");
                    }
                }
                _ = tick(&mut schedule) => {
                    let queued = self.trigger_scheduled().await;
                    if !queued.is_empty() {
                        tracing::info!(queued = queued.len(), "scheduled incremental syncs queued");
                        if let Err(e) = self.dispatch().await {
                            tracing::error!(error = %e, "failed to claim queued jobs");
                        }
                    }
                }
                _ = purge.tick() => {
                    if let Err(e) = self.purge_events().await {
                        tracing::warn!(error = %e, "webhook event purge failed");
                    }
                }
                Some(result) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.reap(result);
                }
            }
        }

        tracing::info!(active = self.active.len(), "worker stopping");
        for id in self.active.clone() {
            match self.controller.cancel(id).await {
                Ok(_) | Err(ShopsyncError::InvalidTransition { .. }) => {}
                Err(e) => tracing::warn!(job_id = %id, error = %e, "failed to cancel job on shutdown"),
            }
        }
        self.drain().await;
        tracing::info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::resources::ResourceRegistry;
    use crate::test_support::{
        product, MemoryEvents, MemoryJobs, MemoryRecords, ScriptedResource,
    };
    use shopsync_common::types::ResourceType;
    use shopsync_db::jobs::models::{ErrorDetail, JobState, SyncStats};
    use shopsync_db::webhooks::models::WebhookEvent;

    fn worker(config: SyncConfig) -> (SyncWorker<MemoryJobs, MemoryRecords, MemoryEvents>, MemoryJobs, MemoryEvents) {
        let jobs = MemoryJobs::default();
        let events = MemoryEvents::default();
        let mut registry = ResourceRegistry::new();
        registry.register(Arc::new(ScriptedResource::new(
            ResourceType::Product,
            vec![vec![product(1), product(2)]],
        )));
        registry.register(Arc::new(ScriptedResource::new(
            ResourceType::Customer,
            Vec::new(),
        )));
        let controller = SyncController::new(
            jobs.clone(),
            MemoryRecords::default(),
            events.clone(),
            registry,
            config,
        );
        (SyncWorker::new(Arc::new(controller)), jobs, events)
    }

    fn two_resources() -> SyncConfig {
        SyncConfig {
            resources: vec![ResourceType::Product, ResourceType::Customer],
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn dispatch_runs_one_task_per_queued_job() {
        let (mut worker, jobs, _) = worker(two_resources());
        let queued = worker.trigger_scheduled().await;
        assert_eq!(queued.len(), 2);

        assert_eq!(worker.dispatch().await.unwrap(), 2);
        worker.drain().await;

        assert_eq!(worker.active_jobs(), 0);
        let all = jobs.all();
        assert!(all.iter().all(|j| j.state == JobState::Completed));
        let product_job = all
            .iter()
            .find(|j| j.resource_type == ResourceType::Product)
            .unwrap();
        assert_eq!(product_job.stats.imported, 2);
    }

    #[tokio::test]
    async fn scheduled_trigger_skips_resources_with_active_jobs() {
        let (worker, jobs, _) = worker(two_resources());
        assert_eq!(worker.trigger_scheduled().await.len(), 2);
        assert!(worker.trigger_scheduled().await.is_empty());
        assert_eq!(jobs.all().len(), 2);
    }

    #[tokio::test]
    async fn purge_keeps_recent_and_unprocessed_events() {
        let (worker, _, events) = worker(two_resources());
        let old = Utc::now() - chrono::Duration::days(30);
        for processed in [Some(old), None] {
            events
                .record(WebhookEvent {
                    id: Uuid::new_v4(),
                    topic: "products/update".to_string(),
                    resource_type: ResourceType::Product,
                    external_id: None,
                    payload: serde_json::Value::Null,
                    received_at: old,
                    signature_valid: true,
                    processed_at: processed,
                })
                .await
                .unwrap();
        }

        assert_eq!(worker.purge_events().await.unwrap(), 1);
        assert_eq!(events.all().len(), 1);
        assert!(events.all()[0].processed_at.is_none());
    }

    #[tokio::test]
    async fn recover_fails_jobs_left_running_by_a_previous_worker() {
        let (worker, jobs, _) = worker(two_resources());
        let handle = worker
            .controller
            .start_full_sync(ResourceType::Product)
            .await
            .unwrap();
        jobs.claim_next().await.unwrap().unwrap();
        jobs.save_checkpoint(
            handle.id,
            Some("c1"),
            &SyncStats::default(),
            &ErrorDetail::default(),
        )
        .await
        .unwrap();

        let mut restarted = SyncWorker::new(worker.controller.clone());
        assert_eq!(restarted.dispatch().await.unwrap(), 0);
        assert_eq!(restarted.recover().await.unwrap(), 1);

        let job = jobs.snapshot(handle.id);
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.checkpoint_cursor.as_deref(), Some("c1"));
        assert!(job
            .error_detail
            .unwrap()
            .message
            .unwrap()
            .starts_with("interrupted"));

        let resumed = restarted.controller.resume(handle.id).await.unwrap();
        assert_eq!(resumed.resumed_from, Some(handle.id));
        assert_eq!(restarted.dispatch().await.unwrap(), 1);
        restarted.drain().await;
        assert_eq!(jobs.snapshot(resumed.id).state, JobState::Completed);
    }

    #[tokio::test]
    async fn run_processes_jobs_until_shutdown() {
        let config = SyncConfig {
            worker_poll_interval_secs: 1,
            ..two_resources()
        };
        let (worker, jobs, _) = worker(config);
        worker.trigger_scheduled().await;

        worker
            .run(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        let all = jobs.all();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|j| j.state.is_terminal()));
    }
}
