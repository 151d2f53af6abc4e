use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::history::HistoryEvent;
use crate::types::{OrchestrationInstance, OrchestrationStatus};

// ── OrchestrationRuntimeState ─────────────────────────────────────────────────

/// The replayable in-memory projection of one execution's history.
///
/// `events` holds what the history store already committed; `new_events`
/// accumulates this episode's appends. A checkpoint persists `new_events` and
/// folds them into `events`. The projection (status, correlation sets) is
/// maintained incrementally so duplicate deliveries can be detected without
/// rescanning.
#[derive(Debug, Clone, Default)]
pub struct OrchestrationRuntimeState {
    events: Vec<HistoryEvent>,
    new_events: Vec<HistoryEvent>,

    instance: Option<OrchestrationInstance>,
    name: Option<String>,
    version: Option<String>,
    input: Option<Value>,
    output: Option<Value>,
    failure_reason: Option<String>,
    status: OrchestrationStatus,
    created_time: Option<DateTime<Utc>>,
    completed_time: Option<DateTime<Utc>>,
    continued_as_new_input: Option<Value>,

    scheduled_tasks: HashSet<i32>,
    finished_tasks: HashSet<i32>,
    created_timers: HashSet<i32>,
    fired_timers: HashSet<i32>,
}

impl OrchestrationRuntimeState {
    /// Rebuild the projection from committed history.
    pub fn from_history(events: Vec<HistoryEvent>) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(&event);
            state.events.push(event);
        }
        state
    }

    /// Append an event produced in this episode.
    pub fn add_event(&mut self, event: HistoryEvent) {
        self.apply(&event);
        self.new_events.push(event);
    }

    fn apply(&mut self, event: &HistoryEvent) {
        match event {
            HistoryEvent::OrchestratorStarted { .. } | HistoryEvent::GenericEvent { .. } => {}
            HistoryEvent::ExecutionStarted {
                timestamp,
                name,
                version,
                input,
                instance,
                ..
            } => {
                self.instance = Some(instance.clone());
                self.name = Some(name.clone());
                self.version = Some(version.clone());
                self.input = input.clone();
                self.created_time = Some(*timestamp);
                self.status = OrchestrationStatus::Running;
            }
            HistoryEvent::ExecutionCompleted {
                timestamp, result, ..
            } => {
                self.output = result.clone();
                self.completed_time = Some(*timestamp);
                self.status = OrchestrationStatus::Completed;
            }
            HistoryEvent::ExecutionFailed {
                timestamp, reason, ..
            } => {
                self.failure_reason = Some(reason.clone());
                self.completed_time = Some(*timestamp);
                self.status = OrchestrationStatus::Failed;
            }
            HistoryEvent::ExecutionTerminated {
                timestamp, reason, ..
            } => {
                self.failure_reason = Some(reason.clone());
                self.completed_time = Some(*timestamp);
                self.status = OrchestrationStatus::Terminated;
            }
            HistoryEvent::ContinuedAsNew {
                timestamp, input, ..
            } => {
                self.continued_as_new_input = input.clone();
                self.completed_time = Some(*timestamp);
                self.status = OrchestrationStatus::ContinuedAsNew;
            }
            HistoryEvent::TaskScheduled { event_id, .. } => {
                self.scheduled_tasks.insert(*event_id);
            }
            HistoryEvent::TaskCompleted {
                task_scheduled_id, ..
            }
            | HistoryEvent::TaskFailed {
                task_scheduled_id, ..
            } => {
                self.finished_tasks.insert(*task_scheduled_id);
            }
            HistoryEvent::TimerCreated { event_id, .. } => {
                self.created_timers.insert(*event_id);
            }
            HistoryEvent::TimerFired { timer_id, .. } => {
                self.fired_timers.insert(*timer_id);
            }
            HistoryEvent::EventRaised { .. } => {}
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn instance(&self) -> Option<&OrchestrationInstance> {
        self.instance.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn input(&self) -> Option<&Value> {
        self.input.as_ref()
    }

    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn status(&self) -> OrchestrationStatus {
        if self.instance.is_none() {
            OrchestrationStatus::Pending
        } else {
            self.status
        }
    }

    pub fn created_time(&self) -> Option<DateTime<Utc>> {
        self.created_time
    }

    pub fn completed_time(&self) -> Option<DateTime<Utc>> {
        self.completed_time
    }

    pub fn continued_as_new_input(&self) -> Option<&Value> {
        self.continued_as_new_input.as_ref()
    }

    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    pub fn new_events(&self) -> &[HistoryEvent] {
        &self.new_events
    }

    /// Committed plus pending events, in order.
    pub fn full_history(&self) -> Vec<HistoryEvent> {
        self.events
            .iter()
            .chain(self.new_events.iter())
            .cloned()
            .collect()
    }

    /// Next free orchestrator-assigned event id.
    pub fn next_event_id(&self) -> i32 {
        self.events
            .iter()
            .chain(self.new_events.iter())
            .map(HistoryEvent::event_id)
            .max()
            .map_or(0, |id| id + 1)
    }

    pub fn has_started(&self) -> bool {
        self.instance.is_some()
    }

    // ── Duplicate detection (at-least-once delivery) ─────────────────────────

    /// True when applying `event` would repeat an effect history already
    /// records. Used by replay to make duplicate deliveries no-ops.
    pub fn is_duplicate(&self, event: &HistoryEvent) -> bool {
        match event {
            HistoryEvent::ExecutionStarted { .. } => self.has_started(),
            HistoryEvent::TaskCompleted {
                task_scheduled_id, ..
            }
            | HistoryEvent::TaskFailed {
                task_scheduled_id, ..
            } => {
                !self.scheduled_tasks.contains(task_scheduled_id)
                    || self.finished_tasks.contains(task_scheduled_id)
            }
            HistoryEvent::TimerFired { timer_id, .. } => {
                !self.created_timers.contains(timer_id) || self.fired_timers.contains(timer_id)
            }
            _ => false,
        }
    }
}

// ── OrchestrationState (summary row) ─────────────────────────────────────────

/// The queryable per-execution summary row, as returned by `get_state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationState {
    pub instance: OrchestrationInstance,
    pub name: String,
    pub version: String,
    pub status: OrchestrationStatus,
    pub created_time: DateTime<Utc>,
    pub last_updated_time: DateTime<Utc>,
    pub completed_time: Option<DateTime<Utc>>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub failure_reason: Option<String>,
}

// ── Query filter ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct OrchestrationStateFilter {
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub statuses: Option<Vec<OrchestrationStatus>>,
}

impl OrchestrationStateFilter {
    pub fn matches(&self, state: &OrchestrationState) -> bool {
        if let Some(from) = self.created_from {
            if state.created_time < from {
                return false;
            }
        }
        if let Some(to) = self.created_to {
            if state.created_time > to {
                return false;
            }
        }
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&state.status) {
                return false;
            }
        }
        true
    }
}
