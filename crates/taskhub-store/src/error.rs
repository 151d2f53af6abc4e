use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency conflict: the ETag, pop receipt or lease token
    /// presented no longer matches what the store holds.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Network-level or throttling failure worth retrying with backoff.
    #[error("transient storage error during {operation}: {message}")]
    Transient { operation: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}
