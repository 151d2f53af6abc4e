use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;

/// One delivery of a queue message. `pop_receipt` is only valid until the
/// visibility timeout lapses or the message is delivered again; operations
/// presented with a stale receipt fail with `PreconditionFailed`.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub message_id: String,
    pub pop_receipt: String,
    pub body: String,
    pub dequeue_count: u32,
    pub inserted_at: DateTime<Utc>,
    pub next_visible_at: DateTime<Utc>,
}

/// A visibility-timeout queue of opaque string payloads, in the shape of a
/// cloud storage queue: ordered-ish delivery, per-delivery receipts, and
/// re-delivery (with incremented `dequeue_count`) after a consumer crash.
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn create_if_not_exists(&self) -> Result<(), StoreError>;

    /// Enqueue a payload. With `initial_delay`, the message stays invisible
    /// until the delay lapses (timer messages).
    async fn send(&self, body: String, initial_delay: Option<Duration>) -> Result<(), StoreError>;

    /// Dequeue up to `max` currently-visible messages, hiding each for
    /// `visibility_timeout`.
    async fn receive_batch(
        &self,
        max: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError>;

    /// Push the message's visibility out to `now + visibility_timeout`.
    /// Returns the replacement pop receipt.
    async fn extend_visibility(
        &self,
        message_id: &str,
        pop_receipt: &str,
        visibility_timeout: Duration,
    ) -> Result<String, StoreError>;

    /// Permanently remove a delivered message.
    async fn delete(&self, message_id: &str, pop_receipt: &str) -> Result<(), StoreError>;

    /// Make a delivered message visible again immediately.
    async fn abandon(&self, message_id: &str, pop_receipt: &str) -> Result<(), StoreError>;

    async fn approximate_len(&self) -> Result<usize, StoreError>;
}
