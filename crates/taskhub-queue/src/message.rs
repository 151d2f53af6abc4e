use taskhub_domain::TaskMessage;
use taskhub_store::QueueMessage;
use uuid::Uuid;

/// One received queue message, decoded and ready for dispatch. Carries the
/// original delivery so renew/delete/abandon can present the live receipt.
#[derive(Debug, Clone)]
pub struct MessageData {
    pub task_message: TaskMessage,
    pub original_message: QueueMessage,
    /// Set when the payload was off-loaded; deleted together with the
    /// message, never on abandon.
    pub compressed_blob_name: Option<String>,
    /// Serialized size of the payload before any off-loading.
    pub total_bytes: usize,
    /// Receiver-local monotonic receive counter.
    pub sequence_number: i64,
    pub queue_name: String,
    /// Correlation id for tracing one delivery through the system.
    pub activity_id: Uuid,
}

impl MessageData {
    pub fn dequeue_count(&self) -> u32 {
        self.original_message.dequeue_count
    }

    pub fn instance_id(&self) -> &taskhub_domain::InstanceId {
        &self.task_message.instance.instance_id
    }
}
