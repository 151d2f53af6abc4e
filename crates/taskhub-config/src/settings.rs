use std::time::Duration;

use taskhub_domain::{WorkerId, MAX_PARTITION_COUNT, MIN_PARTITION_COUNT};
use uuid::Uuid;

use crate::error::ConfigError;

pub const MIN_CONTROL_QUEUE_BATCH_SIZE: u32 = 1;
pub const MAX_CONTROL_QUEUE_BATCH_SIZE: u32 = 32;

/// Every recognized option of the hub, with the defaults a worker starts from
/// when no settings file is given.
#[derive(Debug, Clone)]
pub struct TaskHubSettings {
    /// Namespace for queues, leases and large-message blobs.
    pub task_hub_name: String,
    /// Backend credentials, passed through to the storage bindings untouched.
    pub storage_connection_string: Option<String>,
    /// Unique per process; used as the lease holder identity.
    pub worker_id: WorkerId,
    /// Immutable per hub after creation.
    pub partition_count: u32,
    pub control_queue_batch_size: u32,
    pub max_concurrent_orchestration_work_items: usize,
    pub max_concurrent_activity_work_items: usize,
    /// Keep sessions warm across work-item boundaries.
    pub extended_sessions_enabled: bool,
    pub max_storage_operation_concurrency: usize,
    /// Absolute lease TTL. Must be at least 3x the renew interval.
    pub lease_interval: Duration,
    pub lease_renew_interval: Duration,
    pub lease_acquire_interval: Duration,
    pub control_queue_visibility_timeout: Duration,
    pub work_item_queue_visibility_timeout: Duration,
}

impl Default for TaskHubSettings {
    fn default() -> Self {
        Self {
            task_hub_name: "default".to_string(),
            storage_connection_string: None,
            worker_id: WorkerId::new(Uuid::new_v4().to_string()),
            partition_count: 4,
            control_queue_batch_size: 32,
            max_concurrent_orchestration_work_items: 100,
            max_concurrent_activity_work_items: 10,
            extended_sessions_enabled: false,
            max_storage_operation_concurrency: 64,
            lease_interval: Duration::from_secs(30),
            lease_renew_interval: Duration::from_secs(10),
            lease_acquire_interval: Duration::from_secs(10),
            control_queue_visibility_timeout: Duration::from_secs(300),
            work_item_queue_visibility_timeout: Duration::from_secs(300),
        }
    }
}

impl TaskHubSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.task_hub_name.is_empty() {
            return Err(ConfigError::Invalid {
                setting: "task_hub_name".into(),
                message: "must not be empty".into(),
            });
        }
        if !(MIN_PARTITION_COUNT..=MAX_PARTITION_COUNT).contains(&self.partition_count) {
            return Err(ConfigError::Invalid {
                setting: "partition_count".into(),
                message: format!(
                    "{} outside [{}, {}]",
                    self.partition_count, MIN_PARTITION_COUNT, MAX_PARTITION_COUNT
                ),
            });
        }
        if !(MIN_CONTROL_QUEUE_BATCH_SIZE..=MAX_CONTROL_QUEUE_BATCH_SIZE)
            .contains(&self.control_queue_batch_size)
        {
            return Err(ConfigError::Invalid {
                setting: "control_queue_batch_size".into(),
                message: format!(
                    "{} outside [{}, {}]",
                    self.control_queue_batch_size,
                    MIN_CONTROL_QUEUE_BATCH_SIZE,
                    MAX_CONTROL_QUEUE_BATCH_SIZE
                ),
            });
        }
        if self.worker_id.as_str().is_empty() {
            return Err(ConfigError::Invalid {
                setting: "worker_id".into(),
                message: "must not be empty".into(),
            });
        }
        if self.lease_renew_interval.is_zero() {
            return Err(ConfigError::Invalid {
                setting: "lease_renew_interval".into(),
                message: "must be nonzero".into(),
            });
        }
        // An expired lease must survive at least two missed renews.
        if self.lease_interval < self.lease_renew_interval * 3 {
            return Err(ConfigError::Invalid {
                setting: "lease_interval".into(),
                message: format!(
                    "{:?} must be at least 3x lease_renew_interval ({:?})",
                    self.lease_interval, self.lease_renew_interval
                ),
            });
        }
        if self.max_storage_operation_concurrency == 0 {
            return Err(ConfigError::Invalid {
                setting: "max_storage_operation_concurrency".into(),
                message: "must be nonzero".into(),
            });
        }
        Ok(())
    }
}
