use std::io::{Read, Write};
use std::sync::Arc;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use taskhub_domain::TaskMessage;
use taskhub_store::BlobStore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;

/// Inline budget for a queue payload. Storage queues cap messages at 64 KiB
/// of encoded text; staying under 48 KiB of raw JSON leaves room for the
/// transfer encoding.
pub const DEFAULT_INLINE_THRESHOLD_BYTES: usize = 48 * 1024;

/// What actually travels on the queue: either the message itself or a
/// pointer into the large-messages container.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum MessageEnvelope {
    Inline { message: TaskMessage },
    Blob { blob_name: String },
}

/// The result of encoding one message for enqueue.
#[derive(Debug, Clone)]
pub struct EncodedMessage {
    pub body: String,
    pub blob_name: Option<String>,
    pub total_bytes: usize,
}

/// Encodes any [`TaskMessage`] into a payload that fits the queue's byte
/// budget, off-loading oversized payloads to the blob store as
/// `<instanceId>/<uuid>.json.gz`.
pub struct LargeMessageCodec {
    blob_store: Arc<dyn BlobStore>,
    threshold: usize,
}

impl LargeMessageCodec {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self::with_threshold(blob_store, DEFAULT_INLINE_THRESHOLD_BYTES)
    }

    pub fn with_threshold(blob_store: Arc<dyn BlobStore>, threshold: usize) -> Self {
        Self {
            blob_store,
            threshold,
        }
    }

    pub async fn encode(&self, message: &TaskMessage) -> Result<EncodedMessage, QueueError> {
        let serialized = serde_json::to_string(message)?;
        let total_bytes = serialized.len();
        if total_bytes <= self.threshold {
            let body = serde_json::to_string(&MessageEnvelope::Inline {
                message: message.clone(),
            })?;
            return Ok(EncodedMessage {
                body,
                blob_name: None,
                total_bytes,
            });
        }

        let blob_name = format!(
            "{}/{}.json.gz",
            message.instance.instance_id,
            Uuid::new_v4()
        );
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(serialized.as_bytes())?;
        let compressed = encoder.finish()?;
        debug!(
            blob_name = %blob_name,
            total_bytes,
            compressed_bytes = compressed.len(),
            "off-loading large message"
        );
        self.blob_store.put(&blob_name, compressed).await?;

        let body = serde_json::to_string(&MessageEnvelope::Blob {
            blob_name: blob_name.clone(),
        })?;
        Ok(EncodedMessage {
            body,
            blob_name: Some(blob_name),
            total_bytes,
        })
    }

    /// Decode a queue payload back into the message it carries. Returns the
    /// blob name when the payload was off-loaded.
    pub async fn decode(
        &self,
        queue_name: &str,
        body: &str,
    ) -> Result<(TaskMessage, Option<String>), QueueError> {
        let envelope: MessageEnvelope =
            serde_json::from_str(body).map_err(|e| QueueError::PermanentDecode {
                queue: queue_name.to_string(),
                message: e.to_string(),
            })?;
        match envelope {
            MessageEnvelope::Inline { message } => Ok((message, None)),
            MessageEnvelope::Blob { blob_name } => {
                let compressed = self.blob_store.get(&blob_name).await?;
                let mut decoder = GzDecoder::new(compressed.as_slice());
                let mut serialized = String::new();
                decoder
                    .read_to_string(&mut serialized)
                    .map_err(|e| QueueError::PermanentDecode {
                        queue: queue_name.to_string(),
                        message: format!("blob {blob_name}: {e}"),
                    })?;
                let message = serde_json::from_str(&serialized).map_err(|e| {
                    QueueError::PermanentDecode {
                        queue: queue_name.to_string(),
                        message: format!("blob {blob_name}: {e}"),
                    }
                })?;
                Ok((message, Some(blob_name)))
            }
        }
    }

    /// Fire-and-forget blob cleanup after a successful checkpoint.
    pub fn delete_blob(&self, blob_name: &str) {
        let blob_store = self.blob_store.clone();
        let blob_name = blob_name.to_string();
        tokio::spawn(async move {
            if let Err(e) = blob_store.delete(&blob_name).await {
                warn!(blob_name = %blob_name, error = %e, "large-message blob cleanup failed");
            }
        });
    }

    /// Delete every off-loaded payload belonging to an instance (purge path).
    pub async fn delete_instance_blobs(&self, instance_id: &str) -> Result<usize, QueueError> {
        Ok(self
            .blob_store
            .delete_prefix(&format!("{instance_id}/"))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use taskhub_domain::{
        ExecutionId, HistoryEvent, InstanceId, OrchestrationInstance, TaskMessage,
    };
    use taskhub_store::InMemoryBlobStore;

    fn message_with_payload(payload: serde_json::Value) -> TaskMessage {
        TaskMessage::new(
            HistoryEvent::EventRaised {
                event_id: -1,
                timestamp: Utc::now(),
                name: "payload".into(),
                data: Some(payload),
            },
            OrchestrationInstance::new(InstanceId::new("i1"), ExecutionId::new("e1")),
        )
    }

    fn codec_with_store() -> (LargeMessageCodec, Arc<InMemoryBlobStore>) {
        let store = Arc::new(InMemoryBlobStore::new());
        (LargeMessageCodec::new(store.clone()), store)
    }

    #[tokio::test]
    async fn small_message_stays_inline() {
        let (codec, store) = codec_with_store();
        let message = message_with_payload(json!("small"));

        let encoded = codec.encode(&message).await.unwrap();
        assert!(encoded.blob_name.is_none());
        assert!(store.list("").await.unwrap().is_empty());

        let (decoded, blob) = codec.decode("q", &encoded.body).await.unwrap();
        assert_eq!(decoded, message);
        assert!(blob.is_none());
    }

    #[tokio::test]
    async fn large_message_round_trips_through_blob() {
        let (codec, store) = codec_with_store();
        let message = message_with_payload(json!("x".repeat(256 * 1024)));

        let encoded = codec.encode(&message).await.unwrap();
        let blob_name = encoded.blob_name.clone().expect("expected off-load");
        assert!(blob_name.starts_with("i1/"));
        assert!(blob_name.ends_with(".json.gz"));
        assert!(encoded.body.len() < DEFAULT_INLINE_THRESHOLD_BYTES);
        assert_eq!(store.list("i1/").await.unwrap().len(), 1);

        let (decoded, blob) = codec.decode("q", &encoded.body).await.unwrap();
        assert_eq!(decoded, message);
        assert_eq!(blob.as_deref(), Some(blob_name.as_str()));
    }

    #[tokio::test]
    async fn threshold_boundary_is_inclusive() {
        let store = Arc::new(InMemoryBlobStore::new());
        // Pick the exact serialized size as the threshold: at the boundary the
        // message must stay inline, one byte over it must off-load.
        let message = message_with_payload(json!("x".repeat(1024)));
        let exact = serde_json::to_string(&message).unwrap().len();

        let codec = LargeMessageCodec::with_threshold(store.clone(), exact);
        assert!(codec.encode(&message).await.unwrap().blob_name.is_none());

        let codec = LargeMessageCodec::with_threshold(store, exact - 1);
        assert!(codec.encode(&message).await.unwrap().blob_name.is_some());
    }

    #[tokio::test]
    async fn garbage_body_is_a_permanent_decode_error() {
        let (codec, _) = codec_with_store();
        let err = codec.decode("q", "not json").await.unwrap_err();
        assert!(matches!(err, QueueError::PermanentDecode { .. }));
    }

    #[tokio::test]
    async fn missing_blob_surfaces_as_store_error() {
        let (codec, _) = codec_with_store();
        let body = r#"{"kind":"Blob","blob_name":"i1/gone.json.gz"}"#;
        let err = codec.decode("q", body).await.unwrap_err();
        assert!(matches!(err, QueueError::Store(_)));
    }

    #[tokio::test]
    async fn delete_instance_blobs_clears_prefix() {
        let (codec, store) = codec_with_store();
        let message = message_with_payload(json!("x".repeat(256 * 1024)));
        codec.encode(&message).await.unwrap();
        codec.encode(&message).await.unwrap();

        assert_eq!(codec.delete_instance_blobs("i1").await.unwrap(), 2);
        assert!(store.list("i1/").await.unwrap().is_empty());
    }
}
