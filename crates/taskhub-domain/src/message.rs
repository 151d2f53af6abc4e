use serde::{Deserialize, Serialize};

use crate::history::HistoryEvent;
use crate::types::OrchestrationInstance;

/// The unit that travels on control and work-item queues: one history event
/// addressed to one orchestration instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub event: HistoryEvent,
    pub instance: OrchestrationInstance,
    /// Sender-assigned ordering hint; not globally unique.
    #[serde(default)]
    pub sequence_number: i64,
}

impl TaskMessage {
    pub fn new(event: HistoryEvent, instance: OrchestrationInstance) -> Self {
        Self {
            event,
            instance,
            sequence_number: 0,
        }
    }
}
