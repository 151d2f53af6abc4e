use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid task hub name: {0:?}")]
    InvalidTaskHubName(String),

    #[error("partition count {0} outside [1,16]")]
    InvalidPartitionCount(u32),

    #[error("invalid instance id: {0}")]
    InvalidInstanceId(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
