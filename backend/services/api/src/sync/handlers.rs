use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use shopsync_common::error::ShopsyncError;
use shopsync_common::types::ResourceType;
use shopsync_db::jobs::models::{JobState, SyncJob, SyncJobFilter, SyncMode};
use shopsync_db::jobs::repositories::SyncJobRepository;
use shopsync_sync::JobHandle;
use uuid::Uuid;

use crate::error::ApiError;
use crate::sync::requests::ListJobsQuery;
use crate::sync::responses::ListJobsResponse;
use crate::AppState;

const MAX_LIMIT: i64 = 500;

fn parse_resource(raw: &str) -> Result<ResourceType, ShopsyncError> {
    ResourceType::from_str(raw).map_err(ShopsyncError::Validation)
}

fn parse_job_id(raw: &str) -> Result<Uuid, ShopsyncError> {
    Uuid::parse_str(raw).map_err(|_| ShopsyncError::Validation(format!("invalid job id: {raw}")))
}

fn build_filter(query: ListJobsQuery) -> Result<SyncJobFilter, ShopsyncError> {
    if let Some(limit) = query.limit {
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ShopsyncError::Validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
    }
    Ok(SyncJobFilter {
        resource_type: query.resource_type.as_deref().map(parse_resource).transpose()?,
        state: query
            .state
            .as_deref()
            .map(|s| JobState::from_str(s).map_err(ShopsyncError::Validation))
            .transpose()?,
        limit: query.limit,
    })
}

async fn start(
    state: &AppState,
    resource_type: &str,
    mode: SyncMode,
) -> Result<(StatusCode, Json<JobHandle>), ApiError> {
    let resource_type = parse_resource(resource_type)?;
    let handle = state.controller.start(resource_type, mode).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

pub async fn start_full(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
) -> Result<(StatusCode, Json<JobHandle>), ApiError> {
    start(&state, &resource_type, SyncMode::Full).await
}

pub async fn start_incremental(
    State(state): State<AppState>,
    Path(resource_type): Path<String>,
) -> Result<(StatusCode, Json<JobHandle>), ApiError> {
    start(&state, &resource_type, SyncMode::Incremental).await
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<ListJobsResponse>, ApiError> {
    let filter = build_filter(query)?;
    let data = state.controller.jobs().list(filter).await?;
    let count = data.len();
    Ok(Json(ListJobsResponse { data, count }))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.controller.get(id).await?))
}

pub async fn cancel_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SyncJob>, ApiError> {
    let id = parse_job_id(&id)?;
    Ok(Json(state.controller.cancel(id).await?))
}

pub async fn resume_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<JobHandle>), ApiError> {
    let id = parse_job_id(&id)?;
    let handle = state.controller.resume(id).await?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}
