use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::message_queue::{MessageQueue, QueueMessage};

#[derive(Debug, Clone)]
struct StoredMessage {
    message_id: String,
    body: String,
    dequeue_count: u32,
    inserted_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    /// Rotated on every delivery, extension and abandon; a holder of the old
    /// receipt has lost the message.
    pop_receipt: String,
}

#[derive(Debug, Default)]
struct Inner {
    messages: Vec<StoredMessage>,
}

/// In-memory [`MessageQueue`] with real visibility-timeout behavior.
#[derive(Debug, Clone)]
pub struct InMemoryQueue {
    name: String,
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn create_if_not_exists(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn send(&self, body: String, initial_delay: Option<Duration>) -> Result<(), StoreError> {
        let now = Utc::now();
        let visible_at = match initial_delay {
            Some(delay) => now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            None => now,
        };
        let mut guard = self.inner.write().await;
        guard.messages.push(StoredMessage {
            message_id: Uuid::new_v4().to_string(),
            body,
            dequeue_count: 0,
            inserted_at: now,
            visible_at,
            pop_receipt: Uuid::new_v4().to_string(),
        });
        Ok(())
    }

    async fn receive_batch(
        &self,
        max: u32,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueueMessage>, StoreError> {
        let now = Utc::now();
        let hidden_until =
            now + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        let mut guard = self.inner.write().await;
        let mut batch = Vec::new();
        for msg in guard.messages.iter_mut() {
            if batch.len() as u32 >= max {
                break;
            }
            if msg.visible_at > now {
                continue;
            }
            msg.dequeue_count += 1;
            msg.visible_at = hidden_until;
            msg.pop_receipt = Uuid::new_v4().to_string();
            batch.push(QueueMessage {
                message_id: msg.message_id.clone(),
                pop_receipt: msg.pop_receipt.clone(),
                body: msg.body.clone(),
                dequeue_count: msg.dequeue_count,
                inserted_at: msg.inserted_at,
                next_visible_at: msg.visible_at,
            });
        }
        Ok(batch)
    }

    async fn extend_visibility(
        &self,
        message_id: &str,
        pop_receipt: &str,
        visibility_timeout: Duration,
    ) -> Result<String, StoreError> {
        let mut guard = self.inner.write().await;
        let msg = find_mut(&mut guard, message_id, pop_receipt)?;
        msg.visible_at =
            Utc::now() + chrono::Duration::from_std(visibility_timeout).unwrap_or_else(|_| chrono::Duration::zero());
        msg.pop_receipt = Uuid::new_v4().to_string();
        Ok(msg.pop_receipt.clone())
    }

    async fn delete(&self, message_id: &str, pop_receipt: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        find_mut(&mut guard, message_id, pop_receipt)?;
        guard.messages.retain(|m| m.message_id != message_id);
        Ok(())
    }

    async fn abandon(&self, message_id: &str, pop_receipt: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        let msg = find_mut(&mut guard, message_id, pop_receipt)?;
        msg.visible_at = Utc::now();
        msg.pop_receipt = Uuid::new_v4().to_string();
        Ok(())
    }

    async fn approximate_len(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.messages.len())
    }
}

fn find_mut<'a>(
    inner: &'a mut Inner,
    message_id: &str,
    pop_receipt: &str,
) -> Result<&'a mut StoredMessage, StoreError> {
    let msg = inner
        .messages
        .iter_mut()
        .find(|m| m.message_id == message_id)
        .ok_or_else(|| StoreError::NotFound(format!("message {message_id}")))?;
    if msg.pop_receipt != pop_receipt {
        return Err(StoreError::PreconditionFailed(format!(
            "stale pop receipt for message {message_id}"
        )));
    }
    Ok(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_and_receive() {
        let q = InMemoryQueue::new("q");
        q.send("hello".into(), None).await.unwrap();
        let batch = q
            .receive_batch(32, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].body, "hello");
        assert_eq!(batch[0].dequeue_count, 1);
    }

    #[tokio::test]
    async fn received_message_is_invisible_until_timeout() {
        let q = InMemoryQueue::new("q");
        q.send("m".into(), None).await.unwrap();
        let first = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn redelivery_invalidates_old_receipt_and_counts() {
        let q = InMemoryQueue::new("q");
        q.send("m".into(), None).await.unwrap();
        let first = q
            .receive_batch(32, Duration::from_millis(0))
            .await
            .unwrap();
        let second = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        assert_eq!(second[0].dequeue_count, 2);

        // The first delivery's receipt is stale now.
        let err = q
            .delete(&first[0].message_id, &first[0].pop_receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));

        q.delete(&second[0].message_id, &second[0].pop_receipt)
            .await
            .unwrap();
        assert_eq!(q.approximate_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn initial_delay_hides_message() {
        let q = InMemoryQueue::new("q");
        q.send("timer".into(), Some(Duration::from_secs(3600)))
            .await
            .unwrap();
        let batch = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        assert!(batch.is_empty());
        assert_eq!(q.approximate_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn abandon_restores_visibility() {
        let q = InMemoryQueue::new("q");
        q.send("m".into(), None).await.unwrap();
        let first = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        q.abandon(&first[0].message_id, &first[0].pop_receipt)
            .await
            .unwrap();
        let again = q.receive_batch(32, Duration::from_secs(30)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].dequeue_count, 2);
    }

    #[tokio::test]
    async fn extend_visibility_returns_fresh_receipt() {
        let q = InMemoryQueue::new("q");
        q.send("m".into(), None).await.unwrap();
        let first = q.receive_batch(32, Duration::from_secs(1)).await.unwrap();
        let new_receipt = q
            .extend_visibility(
                &first[0].message_id,
                &first[0].pop_receipt,
                Duration::from_secs(3600),
            )
            .await
            .unwrap();
        assert_ne!(new_receipt, first[0].pop_receipt);
        // Old receipt unusable after the extension.
        assert!(q
            .abandon(&first[0].message_id, &first[0].pop_receipt)
            .await
            .is_err());
        q.delete(&first[0].message_id, &new_receipt).await.unwrap();
    }
}
