use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct ListJobsQuery {
    pub resource_type: Option<String>,
    pub state: Option<String>,
    pub limit: Option<i64>,
}
