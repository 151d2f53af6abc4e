use thiserror::Error;

use taskhub_store::StoreError;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The payload cannot be decoded and never will be; poison handling
    /// takes the message, not retry.
    #[error("permanent decode failure on {queue}: {message}")]
    PermanentDecode { queue: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
}
