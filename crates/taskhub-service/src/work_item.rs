use taskhub_domain::{InstanceId, TaskMessage};
use taskhub_queue::MessageData;
use taskhub_session::OrchestrationSession;

/// A batch of orchestrator messages for one instance, surfaced to the
/// dispatcher host. Holds the leased session; completing, abandoning or
/// releasing the work item settles the session.
#[derive(Debug)]
pub struct TaskOrchestrationWorkItem {
    pub(crate) session: OrchestrationSession,
}

impl TaskOrchestrationWorkItem {
    pub fn instance_id(&self) -> &InstanceId {
        &self.session.instance_id
    }

    pub fn partition_id(&self) -> &str {
        &self.session.partition_id
    }

    /// The runtime state loaded (or cached) for this turn.
    pub fn runtime_state(&self) -> &taskhub_domain::OrchestrationRuntimeState {
        &self.session.runtime_state
    }

    /// The new messages to feed through the orchestrator.
    pub fn new_messages(&self) -> impl Iterator<Item = &TaskMessage> {
        self.session.current_batch.iter().map(|m| &m.task_message)
    }
}

/// One activity invocation, surfaced to the dispatcher host.
#[derive(Debug)]
pub struct TaskActivityWorkItem {
    pub(crate) message: MessageData,
}

impl TaskActivityWorkItem {
    pub fn instance_id(&self) -> &InstanceId {
        self.message.instance_id()
    }

    /// The `TaskScheduled` message carrying the activity name and input.
    pub fn task_message(&self) -> &TaskMessage {
        &self.message.task_message
    }
}
