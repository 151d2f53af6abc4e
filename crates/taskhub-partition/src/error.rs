use thiserror::Error;

use taskhub_store::StoreError;

#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("partition manager already started")]
    AlreadyStarted,

    #[error(transparent)]
    Store(#[from] StoreError),
}
