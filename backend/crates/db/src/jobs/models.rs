use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shopsync_common::types::ResourceType;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Incremental => "incremental",
        }
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "full" => Ok(Self::Full),
            "incremental" => Ok(Self::Incremental),
            _ => Err(format!("unknown sync mode: {value}")),
        }
    }
}

/// Lifecycle of a sync run.
///
/// ```text
/// queued -> running -> completed
///              |-----> failed
///              '-----> canceling -> canceled
/// queued -> canceled            (canceled before a worker picked it up)
/// canceling -> failed           (fatal error while winding down)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    /// States that count against the one-active-job-per-resource rule.
    pub const ACTIVE: [JobState; 3] = [Self::Queued, Self::Running, Self::Canceling];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Canceling => "canceling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running)
                | (Self::Queued, Self::Canceled)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
                | (Self::Running, Self::Canceling)
                | (Self::Canceling, Self::Canceled)
                | (Self::Canceling, Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "canceling" => Ok(Self::Canceling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            _ => Err(format!("unknown job state: {value}")),
        }
    }
}

/// Counters accumulated over a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncStats {
    pub pages: u64,
    pub imported: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub exported: u64,
    pub deleted: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedRecord {
    /// External id when known, otherwise the local record id.
    pub reference: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Job-level failure, set when the run aborted.
    pub message: Option<String>,
    pub skipped: Vec<SkippedRecord>,
}

impl ErrorDetail {
    pub fn is_empty(&self) -> bool {
        self.message.is_none() && self.skipped.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub mode: SyncMode,
    pub state: JobState,
    /// Lower bound on remote `updated_at` for incremental runs, fixed at creation.
    pub updated_since: Option<DateTime<Utc>>,
    pub checkpoint_cursor: Option<String>,
    pub resumed_from: Option<Uuid>,
    pub stats: SyncStats,
    pub error_detail: Option<ErrorDetail>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for a job about to be queued.
#[derive(Debug, Clone)]
pub struct NewSyncJob {
    pub resource_type: ResourceType,
    pub mode: SyncMode,
    pub updated_since: Option<DateTime<Utc>>,
    pub checkpoint_cursor: Option<String>,
    pub resumed_from: Option<Uuid>,
}

impl NewSyncJob {
    pub fn new(resource_type: ResourceType, mode: SyncMode) -> Self {
        Self {
            resource_type,
            mode,
            updated_since: None,
            checkpoint_cursor: None,
            resumed_from: None,
        }
    }

    /// Build a fresh queued job continuing from a failed or canceled run.
    pub fn resuming(job: &SyncJob) -> Self {
        Self {
            resource_type: job.resource_type,
            mode: job.mode,
            updated_since: job.updated_since,
            checkpoint_cursor: job.checkpoint_cursor.clone(),
            resumed_from: Some(job.id),
        }
    }

    pub fn into_job(self, id: Uuid, now: DateTime<Utc>) -> SyncJob {
        SyncJob {
            id,
            resource_type: self.resource_type,
            mode: self.mode,
            state: JobState::Queued,
            updated_since: self.updated_since,
            checkpoint_cursor: self.checkpoint_cursor,
            resumed_from: self.resumed_from,
            stats: SyncStats::default(),
            error_detail: None,
            started_at: None,
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncJobFilter {
    pub resource_type: Option<ResourceType>,
    pub state: Option<JobState>,
    pub limit: Option<i64>,
}
