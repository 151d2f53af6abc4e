use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskhub_domain::TaskMessage;
use taskhub_store::MessageQueue;
use tracing::warn;
use uuid::Uuid;

use crate::codec::LargeMessageCodec;
use crate::control_queue::POISON_DEQUEUE_THRESHOLD;
use crate::error::QueueError;
use crate::message::MessageData;

/// The hub-wide queue of activity invocations. Same contract as a control
/// queue, but unpartitioned and dequeued one work item at a time.
pub struct WorkItemQueue {
    queue: Arc<dyn MessageQueue>,
    codec: Arc<LargeMessageCodec>,
    visibility_timeout: Duration,
    sequence: AtomicI64,
}

impl WorkItemQueue {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        codec: Arc<LargeMessageCodec>,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            codec,
            visibility_timeout,
            sequence: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    pub async fn ensure_exists(&self) -> Result<(), QueueError> {
        Ok(self.queue.create_if_not_exists().await?)
    }

    pub async fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let encoded = self.codec.encode(message).await?;
        self.queue.send(encoded.body, None).await?;
        Ok(())
    }

    /// One activity per work item.
    pub async fn dequeue(&self) -> Result<Option<MessageData>, QueueError> {
        let received = self.queue.receive_batch(1, self.visibility_timeout).await?;
        let Some(delivery) = received.into_iter().next() else {
            return Ok(None);
        };
        match self.codec.decode(self.name(), &delivery.body).await {
            Ok((task_message, compressed_blob_name)) => {
                let total_bytes = delivery.body.len();
                Ok(Some(MessageData {
                    task_message,
                    compressed_blob_name,
                    total_bytes,
                    sequence_number: self.sequence.fetch_add(1, Ordering::Relaxed),
                    queue_name: self.name().to_string(),
                    activity_id: Uuid::new_v4(),
                    original_message: delivery,
                }))
            }
            Err(QueueError::PermanentDecode { message, .. }) => {
                if delivery.dequeue_count >= POISON_DEQUEUE_THRESHOLD {
                    warn!(
                        queue = self.name(),
                        message_id = %delivery.message_id,
                        error = %message,
                        "removing poison work item"
                    );
                    self.queue
                        .delete(&delivery.message_id, &delivery.pop_receipt)
                        .await?;
                } else {
                    warn!(
                        queue = self.name(),
                        message_id = %delivery.message_id,
                        error = %message,
                        "undecodable work item, abandoning"
                    );
                    self.queue
                        .abandon(&delivery.message_id, &delivery.pop_receipt)
                        .await?;
                }
                Ok(None)
            }
            Err(other) => Err(other),
        }
    }

    pub async fn renew(&self, message: &mut MessageData) -> Result<(), QueueError> {
        let receipt = self
            .queue
            .extend_visibility(
                &message.original_message.message_id,
                &message.original_message.pop_receipt,
                self.visibility_timeout,
            )
            .await?;
        message.original_message.pop_receipt = receipt;
        Ok(())
    }

    pub async fn delete(&self, message: &MessageData) -> Result<(), QueueError> {
        self.queue
            .delete(
                &message.original_message.message_id,
                &message.original_message.pop_receipt,
            )
            .await?;
        if let Some(blob_name) = &message.compressed_blob_name {
            self.codec.delete_blob(blob_name);
        }
        Ok(())
    }

    pub async fn abandon(&self, message: &MessageData) -> Result<(), QueueError> {
        self.queue
            .abandon(
                &message.original_message.message_id,
                &message.original_message.pop_receipt,
            )
            .await?;
        Ok(())
    }

    pub async fn approximate_length(&self) -> Result<usize, QueueError> {
        Ok(self.queue.approximate_len().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use taskhub_domain::{
        ExecutionId, HistoryEvent, InstanceId, OrchestrationInstance,
    };
    use taskhub_store::{InMemoryBlobStore, InMemoryQueue};

    fn test_queue() -> WorkItemQueue {
        let queue = Arc::new(InMemoryQueue::new("hub-workitems"));
        let codec = Arc::new(LargeMessageCodec::new(Arc::new(InMemoryBlobStore::new())));
        WorkItemQueue::new(queue, codec, Duration::from_secs(300))
    }

    fn scheduled(instance_id: &str) -> TaskMessage {
        TaskMessage::new(
            HistoryEvent::TaskScheduled {
                event_id: 0,
                timestamp: Utc::now(),
                name: "send_email".into(),
                input: Some(json!({"to": "x"})),
            },
            OrchestrationInstance::new(InstanceId::new(instance_id), ExecutionId::new("e1")),
        )
    }

    #[tokio::test]
    async fn dequeues_one_at_a_time() {
        let wq = test_queue();
        wq.enqueue(&scheduled("i1")).await.unwrap();
        wq.enqueue(&scheduled("i2")).await.unwrap();

        let first = wq.dequeue().await.unwrap().unwrap();
        let second = wq.dequeue().await.unwrap().unwrap();
        assert_ne!(
            first.task_message.instance.instance_id,
            second.task_message.instance.instance_id
        );
        assert!(wq.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_queue_returns_none() {
        let wq = test_queue();
        assert!(wq.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn abandoned_work_item_is_redelivered() {
        let wq = test_queue();
        wq.enqueue(&scheduled("i1")).await.unwrap();
        let item = wq.dequeue().await.unwrap().unwrap();
        wq.abandon(&item).await.unwrap();

        let again = wq.dequeue().await.unwrap().unwrap();
        assert_eq!(again.dequeue_count(), 2);
        wq.delete(&again).await.unwrap();
        assert_eq!(wq.approximate_length().await.unwrap(), 0);
    }
}
