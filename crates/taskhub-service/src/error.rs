use taskhub_config::ConfigError;
use taskhub_domain::{DomainError, InstanceId};
use taskhub_partition::PartitionError;
use taskhub_queue::QueueError;
use taskhub_session::SessionError;
use taskhub_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// The hub was created with a different partition count; there is no
    /// migration path, so this is fatal at start.
    #[error("task hub '{task_hub_name}' has {stored} partitions, configured {configured}")]
    PartitionCountMismatch {
        task_hub_name: String,
        stored: u32,
        configured: u32,
    },

    #[error("orchestration instance already exists: {0}")]
    InstanceAlreadyExists(InstanceId),

    #[error("orchestration instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("invalid work item: {0}")]
    InvalidWorkItem(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Partition(#[from] PartitionError),
}
