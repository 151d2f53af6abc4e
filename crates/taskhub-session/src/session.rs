use taskhub_domain::{InstanceId, OrchestrationRuntimeState};
use taskhub_queue::MessageData;

/// One leased-out processing turn for one orchestration instance: the
/// coalesced message batch plus the runtime state (and the ETag guarding its
/// history) loaded for it.
///
/// Whoever holds the session owns the instance in this process; nothing else
/// dispatches messages for it until the session is released.
#[derive(Debug)]
pub struct OrchestrationSession {
    pub instance_id: InstanceId,
    /// The control partition the batch arrived on.
    pub partition_id: String,
    /// ETag of the committed history; `None` for a brand-new instance.
    pub etag: Option<String>,
    pub runtime_state: OrchestrationRuntimeState,
    pub current_batch: Vec<MessageData>,
}
