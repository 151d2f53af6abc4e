use std::path::Path;
use std::time::Duration;

use taskhub_domain::WorkerId;
use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawSettings;
use crate::settings::TaskHubSettings;

/// Environment variables recognized as overrides. They win over the file,
/// which wins over the defaults.
const ENV_TASK_HUB_NAME: &str = "TASKHUB_NAME";
const ENV_CONNECTION_STRING: &str = "TASKHUB_STORAGE_CONNECTION_STRING";
const ENV_WORKER_ID: &str = "TASKHUB_WORKER_ID";

/// Load settings from a YAML file, apply env overrides, and validate.
pub fn load_settings(path: &Path) -> Result<TaskHubSettings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    let raw: RawSettings = serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
        path: path.display().to_string(),
        source: e,
    })?;
    debug!("loaded hub settings from {}", path.display());

    let settings = apply_env(convert(raw));
    settings.validate()?;
    Ok(settings)
}

fn convert(raw: RawSettings) -> TaskHubSettings {
    let mut settings = TaskHubSettings::default();
    if let Some(v) = raw.task_hub_name {
        settings.task_hub_name = v;
    }
    if raw.storage_connection_string.is_some() {
        settings.storage_connection_string = raw.storage_connection_string;
    }
    if let Some(v) = raw.worker_id {
        settings.worker_id = WorkerId::new(v);
    }
    if let Some(v) = raw.partition_count {
        settings.partition_count = v;
    }
    if let Some(v) = raw.control_queue_batch_size {
        settings.control_queue_batch_size = v;
    }
    if let Some(v) = raw.max_concurrent_orchestration_work_items {
        settings.max_concurrent_orchestration_work_items = v;
    }
    if let Some(v) = raw.max_concurrent_activity_work_items {
        settings.max_concurrent_activity_work_items = v;
    }
    if let Some(v) = raw.extended_sessions_enabled {
        settings.extended_sessions_enabled = v;
    }
    if let Some(v) = raw.max_storage_operation_concurrency {
        settings.max_storage_operation_concurrency = v;
    }
    if let Some(v) = raw.lease_interval_secs {
        settings.lease_interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.lease_renew_interval_secs {
        settings.lease_renew_interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.lease_acquire_interval_secs {
        settings.lease_acquire_interval = Duration::from_secs(v);
    }
    if let Some(v) = raw.control_queue_visibility_timeout_secs {
        settings.control_queue_visibility_timeout = Duration::from_secs(v);
    }
    if let Some(v) = raw.work_item_queue_visibility_timeout_secs {
        settings.work_item_queue_visibility_timeout = Duration::from_secs(v);
    }
    settings
}

fn apply_env(mut settings: TaskHubSettings) -> TaskHubSettings {
    if let Ok(v) = std::env::var(ENV_TASK_HUB_NAME) {
        settings.task_hub_name = v;
    }
    if let Ok(v) = std::env::var(ENV_CONNECTION_STRING) {
        settings.storage_connection_string = Some(v);
    }
    if let Ok(v) = std::env::var(ENV_WORKER_ID) {
        settings.worker_id = WorkerId::new(v);
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn empty_file_yields_defaults() {
        let f = write_file("{}");
        let settings = load_settings(f.path()).unwrap();
        assert_eq!(settings.partition_count, 4);
        assert_eq!(settings.control_queue_batch_size, 32);
        assert!(!settings.extended_sessions_enabled);
    }

    #[test]
    fn file_values_override_defaults() {
        let f = write_file(
            "task_hub_name: orders\n\
             partition_count: 8\n\
             extended_sessions_enabled: true\n\
             lease_interval_secs: 60\n\
             lease_renew_interval_secs: 15\n",
        );
        let settings = load_settings(f.path()).unwrap();
        assert_eq!(settings.task_hub_name, "orders");
        assert_eq!(settings.partition_count, 8);
        assert!(settings.extended_sessions_enabled);
        assert_eq!(settings.lease_interval, Duration::from_secs(60));
        assert_eq!(settings.lease_renew_interval, Duration::from_secs(15));
    }

    #[test]
    fn invalid_values_are_rejected_at_load() {
        let f = write_file("partition_count: 99\n");
        assert!(load_settings(f.path()).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let f = write_file("partitoin_count: 4\n");
        assert!(load_settings(f.path()).is_err());
    }
}
