use serde::{Deserialize, Serialize};

/// Raw YAML representation of a hub settings file. All fields optional;
/// anything absent keeps the built-in default. Durations are whole seconds.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub task_hub_name: Option<String>,
    pub storage_connection_string: Option<String>,
    pub worker_id: Option<String>,
    pub partition_count: Option<u32>,
    pub control_queue_batch_size: Option<u32>,
    pub max_concurrent_orchestration_work_items: Option<usize>,
    pub max_concurrent_activity_work_items: Option<usize>,
    pub extended_sessions_enabled: Option<bool>,
    pub max_storage_operation_concurrency: Option<usize>,
    pub lease_interval_secs: Option<u64>,
    pub lease_renew_interval_secs: Option<u64>,
    pub lease_acquire_interval_secs: Option<u64>,
    pub control_queue_visibility_timeout_secs: Option<u64>,
    pub work_item_queue_visibility_timeout_secs: Option<u64>,
}
