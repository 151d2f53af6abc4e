pub mod backend;
pub mod blob_store;
pub mod error;
pub mod history_store;
pub mod lease_store;
pub mod memory;
pub mod message_queue;
pub mod retry;

pub use backend::{InMemoryBackend, StorageBackend};
pub use blob_store::BlobStore;
pub use error::StoreError;
pub use history_store::{HistoryRecord, HistoryStore, PurgeResult};
pub use lease_store::{AcquireOutcome, Lease, LeaseStore, ReleaseOutcome, RenewOutcome};
pub use memory::{InMemoryBlobStore, InMemoryHistoryStore, InMemoryLeaseStore, InMemoryQueue};
pub use message_queue::{MessageQueue, QueueMessage};
pub use retry::{with_retries, RetryPolicy};
