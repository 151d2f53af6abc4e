use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::blob_store::BlobStore;
use crate::error::StoreError;

/// In-memory [`BlobStore`]. Names are flat; prefix operations treat the name
/// as a path the way cloud containers do.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    inner: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn create_if_not_exists(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.insert(name.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        let guard = self.inner.read().await;
        guard
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("blob {name}")))
    }

    async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        Ok(guard.remove(name).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|name, _| !name.starts_with(prefix));
        Ok(before - guard.len())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemoryBlobStore::new();
        store.put("a/b.json.gz", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("a/b.json.gz").await.unwrap(), vec![1, 2, 3]);
        assert!(store.delete("a/b.json.gz").await.unwrap());
        assert!(!store.delete("a/b.json.gz").await.unwrap());
        assert!(matches!(
            store.get("a/b.json.gz").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn overwrite_is_allowed() {
        let store = InMemoryBlobStore::new();
        store.put("k", vec![1]).await.unwrap();
        store.put("k", vec![2]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn delete_prefix_removes_instance_directory() {
        let store = InMemoryBlobStore::new();
        store.put("i1/a.json.gz", vec![1]).await.unwrap();
        store.put("i1/b.json.gz", vec![2]).await.unwrap();
        store.put("i2/c.json.gz", vec![3]).await.unwrap();
        assert_eq!(store.delete_prefix("i1/").await.unwrap(), 2);
        assert_eq!(store.list("").await.unwrap(), vec!["i2/c.json.gz"]);
    }
}
