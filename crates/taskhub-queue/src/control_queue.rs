use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use taskhub_domain::{HistoryEvent, TaskMessage};
use taskhub_store::{MessageQueue, QueueMessage};
use tracing::warn;
use uuid::Uuid;

use crate::codec::LargeMessageCodec;
use crate::error::QueueError;
use crate::message::MessageData;

/// Deliveries past this count are treated as poison: decode failures delete
/// the message instead of abandoning it again.
pub(crate) const POISON_DEQUEUE_THRESHOLD: u32 = 10;

/// A partition's queue of orchestrator-directed messages: ordered-ish
/// visibility-timeout delivery, batching, and large-payload indirection.
pub struct ControlQueue {
    queue: Arc<dyn MessageQueue>,
    codec: Arc<LargeMessageCodec>,
    batch_size: u32,
    visibility_timeout: Duration,
    sequence: AtomicI64,
}

impl ControlQueue {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        codec: Arc<LargeMessageCodec>,
        batch_size: u32,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            codec,
            batch_size,
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

    /// Encode and push one message. Timer messages whose fire time lies in
    /// the future are enqueued with matching initial invisibility.
    pub async fn enqueue(&self, message: &TaskMessage) -> Result<(), QueueError> {
        let delay = delivery_delay(message);
        let encoded = self.codec.encode(message).await?;
        self.queue.send(encoded.body, delay).await?;
        Ok(())
    }

    /// Pull up to the configured batch size. Undecodable messages go through
    /// poison handling instead of failing the batch.
    pub async fn dequeue_batch(&self) -> Result<Vec<MessageData>, QueueError> {
        let received = self
            .queue
            .receive_batch(self.batch_size, self.visibility_timeout)
            .await?;
        let mut batch = Vec::with_capacity(received.len());
        for delivery in received {
            if let Some(data) = self.decode_delivery(delivery).await? {
                batch.push(data);
            }
        }
        Ok(batch)
    }

    async fn decode_delivery(
        &self,
        delivery: QueueMessage,
    ) -> Result<Option<MessageData>, QueueError> {
        match self.codec.decode(self.name(), &delivery.body).await {
            Ok((task_message, compressed_blob_name)) => {
                if delivery.dequeue_count > POISON_DEQUEUE_THRESHOLD {
                    warn!(
                        queue = self.name(),
                        message_id = %delivery.message_id,
                        dequeue_count = delivery.dequeue_count,
                        "message re-delivered excessively, possible processing loop"
                    );
                }
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
                        dequeue_count = delivery.dequeue_count,
                        error = %message,
                        "removing poison message"
                    );
                    self.queue
                        .delete(&delivery.message_id, &delivery.pop_receipt)
                        .await?;
                } else {
                    warn!(
                        queue = self.name(),
                        message_id = %delivery.message_id,
                        dequeue_count = delivery.dequeue_count,
                        error = %message,
                        "undecodable message, abandoning"
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

    /// Extend the message's invisibility window; the replacement receipt is
    /// written back into `message`.
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

    /// Permanently remove a processed message, then clean up its off-loaded
    /// payload in the background.
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

    /// Restore visibility immediately. The off-loaded payload stays: the
    /// message will be delivered and decoded again.
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

/// Initial invisibility for timer messages: a `TimerFired` travelling ahead
/// of its fire time must not surface before it.
fn delivery_delay(message: &TaskMessage) -> Option<Duration> {
    if let HistoryEvent::TimerFired { fire_at, .. } = &message.event {
        let now = Utc::now();
        if *fire_at > now {
            return (*fire_at - now).to_std().ok();
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use taskhub_domain::{ExecutionId, InstanceId, OrchestrationInstance};
    use taskhub_store::{BlobStore, InMemoryBlobStore, InMemoryQueue, StoreError};

    fn test_queue() -> (ControlQueue, Arc<InMemoryQueue>, Arc<InMemoryBlobStore>) {
        let queue = Arc::new(InMemoryQueue::new("hub-control-00"));
        let blobs = Arc::new(InMemoryBlobStore::new());
        let codec = Arc::new(LargeMessageCodec::new(blobs.clone()));
        (
            ControlQueue::new(queue.clone(), codec, 32, Duration::from_secs(300)),
            queue,
            blobs,
        )
    }

    fn raised(instance_id: &str, payload: serde_json::Value) -> TaskMessage {
        TaskMessage::new(
            HistoryEvent::EventRaised {
                event_id: -1,
                timestamp: Utc::now(),
                name: "e".into(),
                data: Some(payload),
            },
            OrchestrationInstance::new(InstanceId::new(instance_id), ExecutionId::new("e1")),
        )
    }

    #[tokio::test]
    async fn enqueue_dequeue_round_trip() {
        let (cq, _, _) = test_queue();
        let message = raised("i1", json!("hi"));
        cq.enqueue(&message).await.unwrap();

        let batch = cq.dequeue_batch().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].task_message, message);
        assert_eq!(batch[0].queue_name, "hub-control-00");
        assert!(batch[0].compressed_blob_name.is_none());
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_receive() {
        let (cq, _, _) = test_queue();
        cq.enqueue(&raised("i1", json!(1))).await.unwrap();
        cq.enqueue(&raised("i2", json!(2))).await.unwrap();
        let batch = cq.dequeue_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
        assert!(batch[0].sequence_number < batch[1].sequence_number);
    }

    #[tokio::test]
    async fn future_timer_is_initially_invisible() {
        let (cq, _, _) = test_queue();
        let timer = TaskMessage::new(
            HistoryEvent::TimerFired {
                event_id: -1,
                timestamp: Utc::now(),
                timer_id: 0,
                fire_at: Utc::now() + chrono::Duration::hours(1),
            },
            OrchestrationInstance::new(InstanceId::new("i1"), ExecutionId::new("e1")),
        );
        cq.enqueue(&timer).await.unwrap();
        assert!(cq.dequeue_batch().await.unwrap().is_empty());
        assert_eq!(cq.approximate_length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn large_payload_blob_deleted_on_delete_not_abandon() {
        let (cq, _, blobs) = test_queue();
        let message = raised("i1", json!("x".repeat(256 * 1024)));
        cq.enqueue(&message).await.unwrap();

        let batch = cq.dequeue_batch().await.unwrap();
        assert!(batch[0].compressed_blob_name.is_some());

        // Abandon keeps the blob; the message must decode again.
        cq.abandon(&batch[0]).await.unwrap();
        assert_eq!(blobs.list("i1/").await.unwrap().len(), 1);

        let batch = cq.dequeue_batch().await.unwrap();
        cq.delete(&batch[0]).await.unwrap();
        // Cleanup runs in the background.
        for _ in 0..50 {
            if blobs.list("i1/").await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("blob was not cleaned up after delete");
    }

    #[tokio::test]
    async fn undecodable_message_is_abandoned_then_removed() {
        let (cq, raw, _) = test_queue();
        raw.send("garbage".into(), None).await.unwrap();

        // First pass abandons.
        assert!(cq.dequeue_batch().await.unwrap().is_empty());
        assert_eq!(cq.approximate_length().await.unwrap(), 1);

        // Drive the dequeue count past the poison threshold.
        for _ in 0..POISON_DEQUEUE_THRESHOLD {
            let _ = cq.dequeue_batch().await.unwrap();
        }
        assert_eq!(cq.approximate_length().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn renew_replaces_the_receipt() {
        let (cq, raw, _) = test_queue();
        cq.enqueue(&raised("i1", json!("m"))).await.unwrap();
        let mut batch = cq.dequeue_batch().await.unwrap();
        let old_receipt = batch[0].original_message.pop_receipt.clone();

        cq.renew(&mut batch[0]).await.unwrap();
        assert_ne!(batch[0].original_message.pop_receipt, old_receipt);

        // The stale receipt no longer works against the raw queue.
        let err = raw
            .delete(&batch[0].original_message.message_id, &old_receipt)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));

        cq.delete(&batch[0]).await.unwrap();
    }
}
