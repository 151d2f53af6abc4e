use async_trait::async_trait;

use crate::error::StoreError;

/// Flat content store addressed by blob name. Writes overwrite; that is
/// enough for idempotent large-message off-loading, where names embed a
/// fresh uuid per payload.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    async fn create_if_not_exists(&self) -> Result<(), StoreError>;

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Fails with `NotFound` when the blob does not exist.
    async fn get(&self, name: &str) -> Result<Vec<u8>, StoreError>;

    /// Returns whether the blob existed.
    async fn delete(&self, name: &str) -> Result<bool, StoreError>;

    /// Delete every blob whose name starts with `prefix`; returns the count.
    async fn delete_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
