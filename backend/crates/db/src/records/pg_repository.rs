use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::records::models::{ExternalRecordMapping, Fields, LocalRecord, PendingDelete};
use crate::records::repositories::RecordRepository;
use shopsync_common::error::{ShopsyncError, ShopsyncResult};
use shopsync_common::types::ResourceType;

const RECORD_COLUMNS: &str =
    "id, resource_type, fields, write_date, active, pending_export, created_at, updated_at";
const MAPPING_COLUMNS: &str =
    "id, local_id, external_id, resource_type, last_synced_at, remote_deleted_at, created_at";

#[derive(Clone)]
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_record(row: &PgRow, prefix: &str) -> ShopsyncResult<LocalRecord> {
        let col = |name: &str| format!("{prefix}{name}");
        let resource_raw: String = row.get(col("resource_type").as_str());
        let fields: Json<Fields> = row.get(col("fields").as_str());

        Ok(LocalRecord {
            id: row.get(col("id").as_str()),
            resource_type: ResourceType::from_str(&resource_raw).map_err(ShopsyncError::Internal)?,
            fields: fields.0,
            write_date: row.get(col("write_date").as_str()),
            active: row.get(col("active").as_str()),
            pending_export: row.get(col("pending_export").as_str()),
            created_at: row.get(col("created_at").as_str()),
            updated_at: row.get(col("updated_at").as_str()),
        })
    }

    fn map_mapping(row: &PgRow, prefix: &str) -> ShopsyncResult<ExternalRecordMapping> {
        let col = |name: &str| format!("{prefix}{name}");
        let resource_raw: String = row.get(col("resource_type").as_str());

        Ok(ExternalRecordMapping {
            id: row.get(col("id").as_str()),
            local_id: row.get(col("local_id").as_str()),
            external_id: row.get(col("external_id").as_str()),
            resource_type: ResourceType::from_str(&resource_raw).map_err(ShopsyncError::Internal)?,
            last_synced_at: row.get(col("last_synced_at").as_str()),
            remote_deleted_at: row.get(col("remote_deleted_at").as_str()),
            created_at: row.get(col("created_at").as_str()),
        })
    }

    async fn upsert_mapping(
        tx: &mut Transaction<'_, Postgres>,
        local_id: Uuid,
        resource_type: ResourceType,
        external_id: &str,
        synced_at: DateTime<Utc>,
    ) -> ShopsyncResult<ExternalRecordMapping> {
        let sql = format!(
            "insert into external_record_mappings
             (id, local_id, external_id, resource_type, last_synced_at)
             values ($1, $2, $3, $4, $5)
             on conflict (external_id, resource_type) do update set
               local_id = excluded.local_id,
               last_synced_at = excluded.last_synced_at,
               remote_deleted_at = null
             returning {MAPPING_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(local_id)
            .bind(external_id)
            .bind(resource_type.as_str())
            .bind(synced_at)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_mapping(&row, "")
    }

    async fn upsert_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &LocalRecord,
    ) -> ShopsyncResult<LocalRecord> {
        let sql = format!(
            "insert into local_records
             (id, resource_type, fields, write_date, active, pending_export, created_at, updated_at)
             values ($1, $2, $3, $4, $5, $6, $7, $8)
             on conflict (id) do update set
               fields = excluded.fields,
               write_date = excluded.write_date,
               active = excluded.active,
               pending_export = excluded.pending_export,
               updated_at = excluded.updated_at
             returning {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.resource_type.as_str())
            .bind(Json(&record.fields))
            .bind(record.write_date)
            .bind(record.active)
            .bind(record.pending_export)
            .bind(record.created_at)
            .bind(Utc::now())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Self::map_record(&row, "")
    }

    async fn update_if_unchanged(
        tx: &mut Transaction<'_, Postgres>,
        record: &LocalRecord,
        expected_write_date: DateTime<Utc>,
    ) -> ShopsyncResult<Option<LocalRecord>> {
        let sql = format!(
            "update local_records
             set fields = $1, write_date = $2, active = $3, pending_export = $4, updated_at = $5
             where id = $6 and resource_type = $7 and write_date = $8
             returning {RECORD_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Json(&record.fields))
            .bind(record.write_date)
            .bind(record.active)
            .bind(record.pending_export)
            .bind(Utc::now())
            .bind(record.id)
            .bind(record.resource_type.as_str())
            .bind(expected_write_date)
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(|r| Self::map_record(&r, "")).transpose()
    }

    async fn begin(&self) -> ShopsyncResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn get_record(
        &self,
        resource_type: ResourceType,
        id: Uuid,
    ) -> ShopsyncResult<Option<LocalRecord>> {
        let sql = format!(
            "select {RECORD_COLUMNS} from local_records where resource_type = $1 and id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(|r| Self::map_record(&r, "")).transpose()
    }

    async fn find_mapping(
        &self,
        resource_type: ResourceType,
        external_id: &str,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        let sql = format!(
            "select {MAPPING_COLUMNS} from external_record_mappings
             where resource_type = $1 and external_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(|r| Self::map_mapping(&r, "")).transpose()
    }

    async fn find_mapping_by_local(
        &self,
        resource_type: ResourceType,
        local_id: Uuid,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        let sql = format!(
            "select {MAPPING_COLUMNS} from external_record_mappings
             where resource_type = $1 and local_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        row.map(|r| Self::map_mapping(&r, "")).transpose()
    }

    async fn count_mappings(&self, resource_type: ResourceType) -> ShopsyncResult<i64> {
        let row = sqlx::query(
            "select count(*) as total from external_record_mappings where resource_type = $1",
        )
        .bind(resource_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(row.get("total"))
    }

    async fn save_local(
        &self,
        mut record: LocalRecord,
        propagate_to_external: bool,
    ) -> ShopsyncResult<LocalRecord> {
        record.write_date = Utc::now();
        record.pending_export = propagate_to_external;

        let mut tx = self.begin().await?;
        let saved = Self::upsert_record(&mut tx, &record).await?;
        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(saved)
    }

    async fn delete_local(
        &self,
        resource_type: ResourceType,
        id: Uuid,
        propagate_to_external: bool,
    ) -> ShopsyncResult<()> {
        let result = sqlx::query(
            "update local_records
             set active = false, pending_export = $1, write_date = $2, updated_at = $2
             where resource_type = $3 and id = $4",
        )
        .bind(propagate_to_external)
        .bind(Utc::now())
        .bind(resource_type.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ShopsyncError::NotFound(format!("{resource_type} record not found: {id}")));
        }
        Ok(())
    }

    async fn save_synced(
        &self,
        record: LocalRecord,
        external_id: &str,
        synced_at: DateTime<Utc>,
        expected_write_date: Option<DateTime<Utc>>,
    ) -> ShopsyncResult<Option<ExternalRecordMapping>> {
        let mut tx = self.begin().await?;

        let saved = match expected_write_date {
            None => Self::upsert_record(&mut tx, &record).await?,
            Some(expected) => match Self::update_if_unchanged(&mut tx, &record, expected).await? {
                Some(saved) => saved,
                // Dropping the transaction rolls it back.
                None => return Ok(None),
            },
        };
        let mapping =
            Self::upsert_mapping(&mut tx, saved.id, saved.resource_type, external_id, synced_at)
                .await?;

        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(Some(mapping))
    }

    async fn touch_mapping(
        &self,
        mapping_id: Uuid,
        synced_at: DateTime<Utc>,
    ) -> ShopsyncResult<()> {
        sqlx::query("update external_record_mappings set last_synced_at = $1 where id = $2")
            .bind(synced_at)
            .bind(mapping_id)
            .execute(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;
        Ok(())
    }

    async fn pending_exports(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<LocalRecord>> {
        let sql = format!(
            "select {RECORD_COLUMNS} from local_records
             where resource_type = $1 and active and pending_export
             order by write_date
             limit $2"
        );
        let rows = sqlx::query(&sql)
            .bind(resource_type.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.iter().map(|r| Self::map_record(r, "")).collect()
    }

    async fn confirm_export(
        &self,
        record_id: Uuid,
        resource_type: ResourceType,
        external_id: &str,
        synced_at: DateTime<Utc>,
        exported_write_date: DateTime<Utc>,
    ) -> ShopsyncResult<ExternalRecordMapping> {
        let mut tx = self.begin().await?;

        let result = sqlx::query(
            "update local_records
             set pending_export = pending_export and write_date <> $1, updated_at = $2
             where resource_type = $3 and id = $4",
        )
        .bind(exported_write_date)
        .bind(Utc::now())
        .bind(resource_type.as_str())
        .bind(record_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(ShopsyncError::NotFound(format!(
                "{resource_type} record not found: {record_id}"
            )));
        }

        let mapping =
            Self::upsert_mapping(&mut tx, record_id, resource_type, external_id, synced_at).await?;

        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(mapping)
    }

    async fn pending_deletes(
        &self,
        resource_type: ResourceType,
        limit: i64,
    ) -> ShopsyncResult<Vec<PendingDelete>> {
        let rows = sqlx::query(
            "select r.id as r_id, r.resource_type as r_resource_type, r.fields as r_fields,
                    r.write_date as r_write_date, r.active as r_active,
                    r.pending_export as r_pending_export, r.created_at as r_created_at,
                    r.updated_at as r_updated_at,
                    m.id as m_id, m.local_id as m_local_id, m.external_id as m_external_id,
                    m.resource_type as m_resource_type, m.last_synced_at as m_last_synced_at,
                    m.remote_deleted_at as m_remote_deleted_at, m.created_at as m_created_at
             from local_records r
             join external_record_mappings m
               on m.local_id = r.id and m.resource_type = r.resource_type
             where r.resource_type = $1 and not r.active and r.pending_export
               and m.remote_deleted_at is null
             order by r.write_date
             limit $2",
        )
        .bind(resource_type.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(PendingDelete {
                    record: Self::map_record(row, "r_")?,
                    mapping: Self::map_mapping(row, "m_")?,
                })
            })
            .collect()
    }

    async fn mark_remote_deleted(
        &self,
        resource_type: ResourceType,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> ShopsyncResult<bool> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(
            "update external_record_mappings
             set remote_deleted_at = coalesce(remote_deleted_at, $1)
             where resource_type = $2 and external_id = $3
             returning local_id",
        )
        .bind(at)
        .bind(resource_type.as_str())
        .bind(external_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        let local_id: Uuid = match row {
            Some(r) => r.get("local_id"),
            None => return Ok(false),
        };

        sqlx::query(
            "update local_records set active = false, pending_export = false, updated_at = $1
             where id = $2",
        )
        .bind(Utc::now())
        .bind(local_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| ShopsyncError::Database(e.to_string()))?;

        Ok(true)
    }

    async fn clear_pending(&self, resource_type: ResourceType, id: Uuid) -> ShopsyncResult<()> {
        sqlx::query(
            "update local_records set pending_export = false, updated_at = $1
             where resource_type = $2 and id = $3",
        )
        .bind(Utc::now())
        .bind(resource_type.as_str())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| ShopsyncError::Database(e.to_string()))?;
        Ok(())
    }
}
