use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

// ── Identifiers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(s: impl Into<String>) -> Self {
        InstanceId(s.into())
    }

    pub fn random() -> Self {
        InstanceId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The generation counter of an instance. A fresh ExecutionId is allocated on
/// every `ContinueAsNew`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new(s: impl Into<String>) -> Self {
        ExecutionId(s.into())
    }

    pub fn random() -> Self {
        ExecutionId(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    pub fn new(s: impl Into<String>) -> Self {
        WorkerId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── OrchestrationInstance ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrchestrationInstance {
    pub instance_id: InstanceId,
    pub execution_id: ExecutionId,
}

impl OrchestrationInstance {
    pub fn new(instance_id: InstanceId, execution_id: ExecutionId) -> Self {
        Self {
            instance_id,
            execution_id,
        }
    }
}

impl std::fmt::Display for OrchestrationInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.instance_id, self.execution_id)
    }
}

// ── Orchestration status ──────────────────────────────────────────────────────

/// The lifecycle state of an orchestration execution.
///
/// Transitions:
///   Pending → Running → Completed | Failed | Terminated | ContinuedAsNew
///   Running → Running (checkpoint with no terminal event)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrchestrationStatus {
    /// Created but no work item has run yet.
    #[default]
    Pending,
    /// At least one work item has executed; not yet terminal.
    Running,
    Completed,
    Failed,
    Terminated,
    /// Terminal for this execution id; a successor execution takes over.
    ContinuedAsNew,
}

impl OrchestrationStatus {
    /// Terminal statuses accept no further messages for the execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed
                | OrchestrationStatus::Failed
                | OrchestrationStatus::Terminated
                | OrchestrationStatus::ContinuedAsNew
        )
    }
}

impl std::fmt::Display for OrchestrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrchestrationStatus::Pending => "pending",
            OrchestrationStatus::Running => "running",
            OrchestrationStatus::Completed => "completed",
            OrchestrationStatus::Failed => "failed",
            OrchestrationStatus::Terminated => "terminated",
            OrchestrationStatus::ContinuedAsNew => "continued_as_new",
        };
        write!(f, "{}", s)
    }
}

// ── TaskHubInfo ───────────────────────────────────────────────────────────────

pub const MIN_PARTITION_COUNT: u32 = 1;
pub const MAX_PARTITION_COUNT: u32 = 16;

/// The sentinel record describing a task hub. Written once into the lease
/// container; the partition count is immutable for the life of the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHubInfo {
    pub task_hub_name: String,
    pub partition_count: u32,
    pub created_at: DateTime<Utc>,
}

impl TaskHubInfo {
    pub fn new(task_hub_name: impl Into<String>, partition_count: u32) -> Result<Self, DomainError> {
        let task_hub_name = task_hub_name.into();
        if task_hub_name.is_empty() {
            return Err(DomainError::InvalidTaskHubName(task_hub_name));
        }
        if !(MIN_PARTITION_COUNT..=MAX_PARTITION_COUNT).contains(&partition_count) {
            return Err(DomainError::InvalidPartitionCount(partition_count));
        }
        Ok(Self {
            task_hub_name,
            partition_count,
            created_at: Utc::now(),
        })
    }
}
