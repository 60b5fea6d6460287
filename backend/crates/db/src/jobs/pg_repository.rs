use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use uuid::Uuid;

use crate::jobs::models::{
    ErrorDetail, JobState, NewSyncJob, SyncJob, SyncJobFilter, SyncMode, SyncStats,
};
use crate::jobs::repositories::SyncJobRepository;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;

const JOB_COLUMNS: &str = "id, resource_type, mode, state, updated_since, checkpoint_cursor, \
     resumed_from, stats, error_detail, started_at, finished_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncJobRepository {
    pool: PgPool,
}

impl PgSyncJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> ShopsyncResult<SyncJob> {
        let resource_raw: String = row.get("resource_type");
        let mode_raw: String = row.get("mode");
        let state_raw: String = row.get("state");
        let stats: Json<SyncStats> = row.get("stats");
        let error_detail: Option<Json<ErrorDetail>> = row.get("error_detail");

        Ok(SyncJob {
            id: row.get("id"),
            resource_type: ResourceType::from_str(&resource_raw).map_err(ShopsyncError::Internal)?,
            mode: SyncMode::from_str(&mode_raw).map_err(ShopsyncError::Internal)?,
            state: JobState::from_str(&state_raw).map_err(ShopsyncError::Internal)?,
            updated_since: row.get("updated_since"),
            checkpoint_cursor: row.get("checkpoint_cursor"),
            resumed_from: row.get("resumed_from"),
            stats: stats.0,
            error_detail: error_detail.map(|d| d.0),
            started_at: row.get("started_at"),
            finished_at: row.get("finished_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    async fn lock_state(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
    ) -> ShopsyncResult<JobState> {
        let row = sqlx::query("select state from sync_jobs where id = $1 for update")
            .bind(id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        let raw: String = match row {
            Some(r) => r.get("state"),
            None => return Err(ShopsyncError::NotFound(format!("sync job not found: {id}"))),
        };
        JobState::from_str(&raw).map_err(ShopsyncError::Internal)
    }

    fn detail_column(detail: &ErrorDetail) -> Option<Json<&ErrorDetail>> {
        if detail.is_empty() {
            None
        } else {
            Some(Json(detail))
        }
    }
}

fn invalid_transition(from: JobState, to: JobState) -> ShopsyncError {
    ShopsyncError::InvalidTransition {
        from: from.to_string(),
        to: to.to_string(),
    }
}

#[async_trait]
impl SyncJobRepository for PgSyncJobRepository {
    async fn create(&self, job: NewSyncJob) -> ShopsyncResult<SyncJob> {
        let resource_type = job.resource_type;
        let sql = format!(
            "insert into sync_jobs
             (id, resource_type, mode, state, updated_since, checkpoint_cursor, resumed_from, stats)
             values ($1, $2, $3, 'queued', $4, $5, $6, $7)
             returning {JOB_COLUMNS}"
        );
        let result = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(job.resource_type.as_str())
            .bind(job.mode.as_str())
            .bind(job.updated_since)
            .bind(&job.checkpoint_cursor)
            .bind(job.resumed_from)
            .bind(Json(SyncStats::default()))
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(row) => Self::map_row(row),
            // Partial unique index on active states rejected the insert.
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(ShopsyncError::AlreadyRunning(resource_type))
            }
            Err(e) => Err(ShopsyncError::Database(e.to_string())),
        }
    }

    async fn get(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        let sql = format!("select {JOB_COLUMNS} from sync_jobs where id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn find_active(&self, resource_type: ResourceType) -> ShopsyncResult<Option<SyncJob>> {
        let sql = format!(
            "select {JOB_COLUMNS} from sync_jobs
             where resource_type = $1 and state in ('queued', 'running', 'canceling')
             limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn last_completed(
        &self,
        resource_type: ResourceType,
    ) -> ShopsyncResult<Option<SyncJob>> {
        let sql = format!(
            "select {JOB_COLUMNS} from sync_jobs
             where resource_type = $1 and state = 'completed'
             order by finished_at desc
             limit 1"
        );
        let row = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn list(&self, filter: SyncJobFilter) -> ShopsyncResult<Vec<SyncJob>> {
        let mut qb = QueryBuilder::new(format!("select {JOB_COLUMNS} from sync_jobs where true"));

        if let Some(resource_type) = filter.resource_type {
            qb.push(" and resource_type = ").push_bind(resource_type.as_str());
        }
        if let Some(state) = filter.state {
            qb.push(" and state = ").push_bind(state.as_str());
        }

        qb.push(" order by created_at desc");
        qb.push(" limit ").push_bind(filter.limit.unwrap_or(50));

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }

    async fn claim(&self, id: Uuid) -> ShopsyncResult<Option<SyncJob>> {
        let sql = format!(
            "update sync_jobs
             set state = 'running', started_at = $1, updated_at = $1
             where id = $2 and state = 'queued'
             returning {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn claim_next(&self) -> ShopsyncResult<Option<SyncJob>> {
        let sql = format!(
            "update sync_jobs
             set state = 'running', started_at = $1, updated_at = $1
             where id = (
               select id from sync_jobs
               where state = 'queued'
               order by created_at
               limit 1
               for update skip locked
             )
             returning {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn save_checkpoint(
        &self,
        id: Uuid,
        cursor: Option<&str>,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob> {
        let sql = format!(
            "update sync_jobs
             set checkpoint_cursor = coalesce($1, checkpoint_cursor), stats = $2,
                 error_detail = $3, updated_at = $4
             where id = $5 and state in ('running', 'canceling')
             returning {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(cursor)
            .bind(Json(stats))
            .bind(Self::detail_column(detail))
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        match row {
            Some(r) => Self::map_row(r),
            None => Err(ShopsyncError::NotFound(format!("running sync job not found: {id}"))),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> ShopsyncResult<SyncJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        let current = Self::lock_state(&mut tx, id).await?;
        let now = Utc::now();

        let sql = match current {
            JobState::Running => format!(
                "update sync_jobs set state = 'canceling', updated_at = $1
                 where id = $2 returning {JOB_COLUMNS}"
            ),
            JobState::Queued => format!(
                "update sync_jobs set state = 'canceled', finished_at = $1, updated_at = $1
                 where id = $2 returning {JOB_COLUMNS}"
            ),
            other => return Err(invalid_transition(other, JobState::Canceling)),
        };

        let row = sqlx::query(&sql)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn finish(
        &self,
        id: Uuid,
        state: JobState,
        stats: &SyncStats,
        detail: &ErrorDetail,
    ) -> ShopsyncResult<SyncJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        let current = Self::lock_state(&mut tx, id).await?;
        if !state.is_terminal() || !current.can_transition_to(state) {
            return Err(invalid_transition(current, state));
        }

        let sql = format!(
            "update sync_jobs
             set state = $1, stats = $2, error_detail = $3, finished_at = $4, updated_at = $4
             where id = $5
             returning {JOB_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(Json(stats))
            .bind(Self::detail_column(detail))
            .bind(Utc::now())
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn fail_interrupted(&self, message: &str) -> ShopsyncResult<Vec<SyncJob>> {
        let sql = format!(
            "update sync_jobs
             set state = 'failed', finished_at = $1, updated_at = $1,
                 error_detail = jsonb_set(
                   coalesce(error_detail, '{{\"skipped\": []}}'::jsonb),
                   '{{message}}',
                   to_jsonb($2::text)
                 )
             where state in ('running', 'canceling')
             returning {JOB_COLUMNS}"
        );
        let rows = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(message)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.into_iter().map(Self::map_row).collect()
    }
}
