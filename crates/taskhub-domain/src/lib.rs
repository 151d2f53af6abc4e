pub mod error;
pub mod history;
pub mod message;
pub mod partition;
pub mod runtime_state;
pub mod types;

mod tests;

pub use error::DomainError;
pub use history::HistoryEvent;
pub use message::TaskMessage;
pub use partition::{
    control_queue_name, fnv1a_32, large_message_container_name, lease_container_name,
    partition_index, work_item_queue_name,
};
pub use runtime_state::{
    OrchestrationRuntimeState, OrchestrationState, OrchestrationStateFilter,
};
pub use types::{
    ExecutionId, InstanceId, OrchestrationInstance, OrchestrationStatus, TaskHubInfo, WorkerId,
    MAX_PARTITION_COUNT, MIN_PARTITION_COUNT,
};
