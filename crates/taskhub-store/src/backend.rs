use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::blob_store::BlobStore;
use crate::history_store::HistoryStore;
use crate::lease_store::LeaseStore;
use crate::memory::{InMemoryBlobStore, InMemoryHistoryStore, InMemoryLeaseStore, InMemoryQueue};
use crate::message_queue::MessageQueue;

/// Bundles the four storage seams of one backing store account. The service
/// resolves named queues and containers through this; real cloud bindings
/// implement it, and [`InMemoryBackend`] stands in for tests and local runs.
pub trait StorageBackend: Send + Sync + 'static {
    /// The queue with the given name. Repeated calls with the same name must
    /// address the same underlying queue.
    fn queue(&self, name: &str) -> Arc<dyn MessageQueue>;

    /// The blob container with the given name.
    fn container(&self, name: &str) -> Arc<dyn BlobStore>;

    fn lease_store(&self) -> Arc<dyn LeaseStore>;

    fn history_store(&self) -> Arc<dyn HistoryStore>;
}

/// In-memory [`StorageBackend`]: queues and containers are memoized by name
/// so every resolver sees the same instance.
#[derive(Default)]
pub struct InMemoryBackend {
    queues: Mutex<HashMap<String, Arc<InMemoryQueue>>>,
    containers: Mutex<HashMap<String, Arc<InMemoryBlobStore>>>,
    leases: Arc<InMemoryLeaseStore>,
    history: Arc<InMemoryHistoryStore>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn queue(&self, name: &str) -> Arc<dyn MessageQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryQueue::new(name)))
            .clone()
    }

    fn container(&self, name: &str) -> Arc<dyn BlobStore> {
        let mut containers = self.containers.lock().unwrap_or_else(|e| e.into_inner());
        containers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryBlobStore::new()))
            .clone()
    }

    fn lease_store(&self) -> Arc<dyn LeaseStore> {
        self.leases.clone()
    }

    fn history_store(&self) -> Arc<dyn HistoryStore> {
        self.history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queues_are_memoized_by_name() {
        let backend = InMemoryBackend::new();
        let a = backend.queue("q");
        let b = backend.queue("q");
        a.send("shared".into(), None).await.unwrap();
        assert_eq!(b.approximate_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_names_are_distinct_queues() {
        let backend = InMemoryBackend::new();
        backend.queue("a").send("m".into(), None).await.unwrap();
        assert_eq!(backend.queue("b").approximate_len().await.unwrap(), 0);
    }
}
