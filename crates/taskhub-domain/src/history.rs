use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::OrchestrationInstance;

// ── HistoryEvent ──────────────────────────────────────────────────────────────

/// One entry in an orchestration's append-only history.
///
/// `event_id` is the orchestrator-assigned sequence used to correlate
/// responses with the event that scheduled them: a `TaskCompleted` names the
/// `event_id` of its `TaskScheduled`, a `TimerFired` names its `TimerCreated`.
/// Events that nothing correlates against carry -1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum HistoryEvent {
    /// Marks the start of one work-item episode during replay.
    OrchestratorStarted {
        event_id: i32,
        timestamp: DateTime<Utc>,
    },
    ExecutionStarted {
        event_id: i32,
        timestamp: DateTime<Utc>,
        name: String,
        version: String,
        input: Option<Value>,
        instance: OrchestrationInstance,
    },
    ExecutionCompleted {
        event_id: i32,
        timestamp: DateTime<Utc>,
        result: Option<Value>,
    },
    ExecutionFailed {
        event_id: i32,
        timestamp: DateTime<Utc>,
        reason: String,
        details: Option<String>,
    },
    ExecutionTerminated {
        event_id: i32,
        timestamp: DateTime<Utc>,
        reason: String,
    },
    ContinuedAsNew {
        event_id: i32,
        timestamp: DateTime<Utc>,
        input: Option<Value>,
    },
    TaskScheduled {
        event_id: i32,
        timestamp: DateTime<Utc>,
        name: String,
        input: Option<Value>,
    },
    TaskCompleted {
        event_id: i32,
        timestamp: DateTime<Utc>,
        task_scheduled_id: i32,
        result: Option<Value>,
    },
    TaskFailed {
        event_id: i32,
        timestamp: DateTime<Utc>,
        task_scheduled_id: i32,
        reason: String,
        details: Option<String>,
    },
    TimerCreated {
        event_id: i32,
        timestamp: DateTime<Utc>,
        fire_at: DateTime<Utc>,
    },
    TimerFired {
        event_id: i32,
        timestamp: DateTime<Utc>,
        timer_id: i32,
        fire_at: DateTime<Utc>,
    },
    EventRaised {
        event_id: i32,
        timestamp: DateTime<Utc>,
        name: String,
        data: Option<Value>,
    },
    /// A neutralized event left behind by rewind; replay ignores it.
    GenericEvent {
        event_id: i32,
        timestamp: DateTime<Utc>,
        data: Option<Value>,
    },
}

impl HistoryEvent {
    pub fn event_id(&self) -> i32 {
        match self {
            HistoryEvent::OrchestratorStarted { event_id, .. }
            | HistoryEvent::ExecutionStarted { event_id, .. }
            | HistoryEvent::ExecutionCompleted { event_id, .. }
            | HistoryEvent::ExecutionFailed { event_id, .. }
            | HistoryEvent::ExecutionTerminated { event_id, .. }
            | HistoryEvent::ContinuedAsNew { event_id, .. }
            | HistoryEvent::TaskScheduled { event_id, .. }
            | HistoryEvent::TaskCompleted { event_id, .. }
            | HistoryEvent::TaskFailed { event_id, .. }
            | HistoryEvent::TimerCreated { event_id, .. }
            | HistoryEvent::TimerFired { event_id, .. }
            | HistoryEvent::EventRaised { event_id, .. }
            | HistoryEvent::GenericEvent { event_id, .. } => *event_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            HistoryEvent::OrchestratorStarted { timestamp, .. }
            | HistoryEvent::ExecutionStarted { timestamp, .. }
            | HistoryEvent::ExecutionCompleted { timestamp, .. }
            | HistoryEvent::ExecutionFailed { timestamp, .. }
            | HistoryEvent::ExecutionTerminated { timestamp, .. }
            | HistoryEvent::ContinuedAsNew { timestamp, .. }
            | HistoryEvent::TaskScheduled { timestamp, .. }
            | HistoryEvent::TaskCompleted { timestamp, .. }
            | HistoryEvent::TaskFailed { timestamp, .. }
            | HistoryEvent::TimerCreated { timestamp, .. }
            | HistoryEvent::TimerFired { timestamp, .. }
            | HistoryEvent::EventRaised { timestamp, .. }
            | HistoryEvent::GenericEvent { timestamp, .. } => *timestamp,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            HistoryEvent::OrchestratorStarted { .. } => "OrchestratorStarted",
            HistoryEvent::ExecutionStarted { .. } => "ExecutionStarted",
            HistoryEvent::ExecutionCompleted { .. } => "ExecutionCompleted",
            HistoryEvent::ExecutionFailed { .. } => "ExecutionFailed",
            HistoryEvent::ExecutionTerminated { .. } => "ExecutionTerminated",
            HistoryEvent::ContinuedAsNew { .. } => "ContinuedAsNew",
            HistoryEvent::TaskScheduled { .. } => "TaskScheduled",
            HistoryEvent::TaskCompleted { .. } => "TaskCompleted",
            HistoryEvent::TaskFailed { .. } => "TaskFailed",
            HistoryEvent::TimerCreated { .. } => "TimerCreated",
            HistoryEvent::TimerFired { .. } => "TimerFired",
            HistoryEvent::EventRaised { .. } => "EventRaised",
            HistoryEvent::GenericEvent { .. } => "GenericEvent",
        }
    }

    /// True for the event kinds that end an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::ExecutionCompleted { .. }
                | HistoryEvent::ExecutionFailed { .. }
                | HistoryEvent::ExecutionTerminated { .. }
                | HistoryEvent::ContinuedAsNew { .. }
        )
    }
}
