use thiserror::Error;

use taskhub_store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),
}
