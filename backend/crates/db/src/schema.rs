use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use sqlx::PgPool;

/// Idempotent DDL for every table the sync engine persists.
const STATEMENTS: &[&str] = &[
    "create table if not exists sync_jobs (
       id uuid primary key,
       resource_type text not null,
       mode text not null,
       state text not null default 'queued',
       updated_since timestamptz,
       checkpoint_cursor text,
       resumed_from uuid references sync_jobs(id),
       stats jsonb not null default '{}'::jsonb,
       error_detail jsonb,
       started_at timestamptz,
       finished_at timestamptz,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    // At most one non-terminal job per resource type.
    "create unique index if not exists sync_jobs_one_active_uidx
       on sync_jobs(resource_type)
       where state in ('queued', 'running', 'canceling')",
    "create index if not exists sync_jobs_queued_idx
       on sync_jobs(created_at) where state = 'queued'",
    "create table if not exists local_records (
       id uuid primary key,
       resource_type text not null,
       fields jsonb not null default '{}'::jsonb,
       write_date timestamptz not null,
       active boolean not null default true,
       pending_export boolean not null default false,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "create index if not exists local_records_pending_idx
       on local_records(resource_type, write_date) where pending_export",
    "create table if not exists external_record_mappings (
       id uuid primary key,
       local_id uuid not null references local_records(id),
       external_id text not null,
       resource_type text not null,
       last_synced_at timestamptz not null,
       remote_deleted_at timestamptz,
       created_at timestamptz not null default now()
     )",
    "create unique index if not exists external_record_mappings_external_uidx
       on external_record_mappings(external_id, resource_type)",
    "create unique index if not exists external_record_mappings_local_uidx
       on external_record_mappings(resource_type, local_id)",
    "create table if not exists webhook_events (
       id uuid primary key,
       topic text not null,
       resource_type text not null,
       external_id text,
       payload jsonb not null,
       received_at timestamptz not null,
       signature_valid boolean not null,
       processed_at timestamptz
     )",
    "create index if not exists webhook_events_pending_idx
       on webhook_events(resource_type, received_at) where processed_at is null",
];

pub async fn ensure_schema(pool: &PgPool) -> ShopsyncResult<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;
    }
    tracing::debug!(statements = STATEMENTS.len(), "schema ensured");
    Ok(())
}
