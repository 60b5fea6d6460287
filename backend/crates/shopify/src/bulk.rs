use std::str::FromStr;
use std::time::Duration;

use serde_json::{json, Value};

use crate::client::ShopifyClient;
use crate::error::ShopifyClientError;
use crate::models::UserError;

const RUN_BULK_QUERY: &str = r#"
mutation RunBulkQuery($query: String!) {
  bulkOperationRunQuery(query: $query) {
    bulkOperation { id status }
    userErrors { field message }
  }
}"#;

const BULK_STATUS_QUERY: &str = r#"
query BulkOperationStatus($id: ID!) {
  node(id: $id) {
    ... on BulkOperation { id status errorCode objectCount url }
  }
}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkStatus {
    Created,
    Running,
    Canceling,
    Completed,
    Canceled,
    Failed,
    Expired,
}

impl BulkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Running => "RUNNING",
            Self::Canceling => "CANCELING",
            Self::Completed => "COMPLETED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
            Self::Expired => "EXPIRED",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Canceled | Self::Failed | Self::Expired
        )
    }
}

impl FromStr for BulkStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "CANCELING" => Ok(Self::Canceling),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELED" => Ok(Self::Canceled),
            "FAILED" => Ok(Self::Failed),
            "EXPIRED" => Ok(Self::Expired),
            _ => Err(format!("unknown bulk operation status: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkOperation {
    pub id: String,
    pub status: BulkStatus,
    pub error_code: Option<String>,
    pub object_count: u64,
    /// JSONL download location; absent when the query matched nothing.
    pub url: Option<String>,
}

impl BulkOperation {
    fn from_node(node: &Value) -> Result<Self, ShopifyClientError> {
        let id = node
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ShopifyClientError::Decode("bulk operation without id".to_string()))?
            .to_string();
        let status = node
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ShopifyClientError::Decode("bulk operation without status".to_string()))
            .and_then(|s| BulkStatus::from_str(s).map_err(ShopifyClientError::Decode))?;
        // UnsignedInt64 is serialized as a string.
        let object_count = match node.get("objectCount") {
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            _ => 0,
        };

        Ok(Self {
            id,
            status,
            error_code: node
                .get("errorCode")
                .and_then(Value::as_str)
                .map(str::to_string),
            object_count,
            url: node.get("url").and_then(Value::as_str).map(str::to_string),
        })
    }
}

impl ShopifyClient {
    /// Submit a bulk query and poll until it finishes.
    ///
    /// Only `COMPLETED` is a success; `FAILED`, `CANCELED` and `EXPIRED` are
    /// terminal errors and are not retried.
    pub async fn run_bulk_query(&self, query: &str) -> Result<BulkOperation, ShopifyClientError> {
        let resp = self
            .execute(RUN_BULK_QUERY, json!({ "query": query }))
            .await?;

        let user_errors = resp.user_errors("/bulkOperationRunQuery");
        if !user_errors.is_empty() {
            return Err(ShopifyClientError::Validation(UserError::describe(&user_errors)));
        }

        let mut operation = resp
            .data_at("/bulkOperationRunQuery/bulkOperation")
            .filter(|v| !v.is_null())
            .ok_or_else(|| ShopifyClientError::Decode("bulkOperationRunQuery returned no operation".to_string()))
            .and_then(BulkOperation::from_node)?;

        tracing::info!(id = %operation.id, "bulk operation submitted");
        let interval = Duration::from_secs(self.config().bulk_poll_interval_secs);

        while !operation.status.is_finished() {
            tokio::time::sleep(interval).await;
            operation = self.bulk_operation_status(&operation.id).await?;
            tracing::debug!(
                id = %operation.id,
                status = operation.status.as_str(),
                objects = operation.object_count,
                "bulk operation polled"
            );
        }

        if operation.status != BulkStatus::Completed {
            return Err(ShopifyClientError::BulkOperationFailed {
                id: operation.id,
                status: operation.status.as_str().to_string(),
                error_code: operation.error_code.unwrap_or_else(|| "UNKNOWN".to_string()),
            });
        }

        tracing::info!(id = %operation.id, objects = operation.object_count, "bulk operation completed");
        Ok(operation)
    }

    pub async fn bulk_operation_status(&self, id: &str) -> Result<BulkOperation, ShopifyClientError> {
        let resp = self.execute(BULK_STATUS_QUERY, json!({ "id": id })).await?;
        let node = resp
            .data_at("/node")
            .filter(|v| !v.is_null())
            .ok_or_else(|| ShopifyClientError::Decode(format!("bulk operation not found: {id}")))?;
        BulkOperation::from_node(node)
    }

    /// Fetch and parse the JSONL result of a completed bulk operation.
    pub async fn download_bulk_results(&self, url: &str) -> Result<Vec<Value>, ShopifyClientError> {
        let response = self.http().get(url).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ShopifyClientError::Transient(format!("bulk download returned {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShopifyClientError::HttpError { status, body });
        }

        let text = response.text().await?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line)
                    .map_err(|e| ShopifyClientError::Decode(format!("bad bulk line: {e}")))
            })
            .collect()
    }
}
