use serde::Serialize;
use shopsync_db::jobs::models::SyncJob;

#[derive(Debug, Serialize)]
pub struct ListJobsResponse {
    pub data: Vec<SyncJob>,
    pub count: usize,
}
