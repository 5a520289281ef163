use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{ParseLabelError, TenantId};

/// Lifecycle of one audited pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "COMPLETED" => Ok(ExecutionStatus::Completed),
            "FAILED" => Ok(ExecutionStatus::Failed),
            other => Err(ParseLabelError {
                kind: "execution status",
                value: other.to_string(),
            }),
        }
    }
}

/// What started a pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerSource {
    Manual,
    Scheduled,
    Cli,
}

impl TriggerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Manual => "MANUAL",
            TriggerSource::Scheduled => "SCHEDULED",
            TriggerSource::Cli => "CLI",
        }
    }
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerSource {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANUAL" => Ok(TriggerSource::Manual),
            "SCHEDULED" => Ok(TriggerSource::Scheduled),
            "CLI" => Ok(TriggerSource::Cli),
            other => Err(ParseLabelError {
                kind: "trigger source",
                value: other.to_string(),
            }),
        }
    }
}

/// Processed / success / failed counters reported by a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub processed: u64,
    pub success: u64,
    pub failed: u64,
}

impl ExecutionCounts {
    pub fn new(processed: u64, success: u64, failed: u64) -> Self {
        Self {
            processed,
            success,
            failed,
        }
    }
}

impl std::ops::AddAssign for ExecutionCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.processed += rhs.processed;
        self.success += rhs.success;
        self.failed += rhs.failed;
    }
}

/// Audit entry for one pipeline invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub job_name: String,
    pub status: ExecutionStatus,
    /// `None` denotes a multi-tenant run
    pub tenant_id: Option<TenantId>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub counts: ExecutionCounts,
    pub error_message: Option<String>,
    pub trigger_source: TriggerSource,
    /// Serialized run parameters
    pub parameters: Option<String>,
}

impl ExecutionRecord {
    /// Build a running entry from a start request and an allocated identifier
    pub fn start(id: i64, new: &NewExecution) -> Self {
        Self {
            id,
            job_name: new.job_name.clone(),
            status: ExecutionStatus::Running,
            tenant_id: new.tenant_id.clone(),
            started_at: new.started_at,
            completed_at: None,
            duration_ms: None,
            counts: ExecutionCounts::default(),
            error_message: None,
            trigger_source: new.trigger_source,
            parameters: new.parameters.clone(),
        }
    }

    /// Close the entry. Callers must not finish an entry twice.
    pub fn finish(
        &mut self,
        status: ExecutionStatus,
        counts: ExecutionCounts,
        error_message: Option<String>,
        completed_at: DateTime<Utc>,
    ) {
        self.status = status;
        self.counts = counts;
        self.error_message = error_message;
        self.completed_at = Some(completed_at);
        self.duration_ms = Some((completed_at - self.started_at).num_milliseconds().max(0));
    }
}

/// Request to open an execution entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewExecution {
    pub job_name: String,
    pub tenant_id: Option<TenantId>,
    pub trigger_source: TriggerSource,
    pub parameters: Option<String>,
    pub started_at: DateTime<Utc>,
}
