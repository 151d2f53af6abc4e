use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use taskhub_domain::{
    ExecutionId, HistoryEvent, InstanceId, OrchestrationInstance, OrchestrationRuntimeState,
    OrchestrationState, OrchestrationStateFilter, OrchestrationStatus,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::history_store::{HistoryRecord, HistoryStore, PurgeResult};

#[derive(Debug, Clone)]
struct ExecutionRecord {
    summary: OrchestrationState,
    /// Committed history; `None` until the first `update_state`.
    events: Vec<HistoryEvent>,
    etag: Option<String>,
    /// Large-message blobs referenced by committed events.
    blob_names: Vec<String>,
}

#[derive(Debug, Default)]
struct InstanceRecord {
    latest: Option<ExecutionId>,
    executions: HashMap<ExecutionId, ExecutionRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    instances: HashMap<InstanceId, InstanceRecord>,
}

/// In-memory [`HistoryStore`]. `update_state` stages the whole append under
/// one write guard, so a commit is observed either completely or not at all.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHistoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn fresh_etag() -> String {
    Uuid::new_v4().to_string()
}

fn summary_from_state(
    new_state: &OrchestrationRuntimeState,
    instance: &OrchestrationInstance,
    existing: Option<&OrchestrationState>,
) -> OrchestrationState {
    let now = Utc::now();
    match existing {
        // Status-only commits keep the row's identity fields.
        Some(row) if !new_state.has_started() => {
            let mut row = row.clone();
            row.last_updated_time = now;
            row
        }
        _ => OrchestrationState {
            instance: instance.clone(),
            name: new_state.name().unwrap_or_default().to_string(),
            version: new_state.version().unwrap_or_default().to_string(),
            status: new_state.status(),
            created_time: new_state.created_time().unwrap_or(now),
            last_updated_time: now,
            completed_time: new_state.completed_time(),
            input: new_state.input().cloned(),
            output: new_state.output().cloned(),
            failure_reason: new_state.failure_reason().map(str::to_string),
        },
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_if_not_exists(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_history(
        &self,
        instance_id: &InstanceId,
        execution_id: Option<&ExecutionId>,
    ) -> Result<Option<HistoryRecord>, StoreError> {
        let guard = self.inner.read().await;
        let Some(instance) = guard.instances.get(instance_id) else {
            return Ok(None);
        };
        let execution_id = match execution_id {
            Some(id) => id,
            None => match &instance.latest {
                Some(id) => id,
                None => return Ok(None),
            },
        };
        Ok(instance.executions.get(execution_id).and_then(|record| {
            record.etag.as_ref().map(|etag| HistoryRecord {
                events: record.events.clone(),
                etag: etag.clone(),
            })
        }))
    }

    async fn update_state(
        &self,
        new_state: &OrchestrationRuntimeState,
        instance: &OrchestrationInstance,
        expected_etag: Option<&str>,
        event_blob_names: &[String],
    ) -> Result<String, StoreError> {
        let mut guard = self.inner.write().await;
        let instance_record = guard
            .instances
            .entry(instance.instance_id.clone())
            .or_default();
        let created = !instance_record
            .executions
            .contains_key(&instance.execution_id);
        let record = instance_record
            .executions
            .entry(instance.execution_id.clone())
            .or_insert_with(|| ExecutionRecord {
                summary: summary_from_state(new_state, instance, None),
                events: Vec::new(),
                etag: None,
                blob_names: Vec::new(),
            });

        match (expected_etag, record.etag.as_deref()) {
            (None, None) => {}
            (Some(expected), Some(stored)) if expected == stored => {}
            (expected, stored) => {
                return Err(StoreError::PreconditionFailed(format!(
                    "etag mismatch for {}: expected {:?}, stored {:?}",
                    instance, expected, stored
                )));
            }
        }

        // Stage the whole append, then swap; summary last.
        let etag = fresh_etag();
        record.events = new_state.full_history();
        record.etag = Some(etag.clone());
        record.blob_names.extend_from_slice(event_blob_names);
        let previous = record.summary.clone();
        record.summary = summary_from_state(new_state, instance, Some(&previous));

        if created {
            instance_record.latest = Some(instance.execution_id.clone());
        }
        Ok(etag)
    }

    async fn set_new_execution(&self, execution_started: &HistoryEvent) -> Result<(), StoreError> {
        let HistoryEvent::ExecutionStarted {
            timestamp,
            name,
            version,
            input,
            instance,
            ..
        } = execution_started
        else {
            return Err(StoreError::Internal(format!(
                "set_new_execution needs ExecutionStarted, got {}",
                execution_started.kind()
            )));
        };

        let mut guard = self.inner.write().await;
        let instance_record = guard
            .instances
            .entry(instance.instance_id.clone())
            .or_default();
        instance_record
            .executions
            .entry(instance.execution_id.clone())
            .or_insert_with(|| ExecutionRecord {
                summary: OrchestrationState {
                    instance: instance.clone(),
                    name: name.clone(),
                    version: version.clone(),
                    status: OrchestrationStatus::Pending,
                    created_time: *timestamp,
                    last_updated_time: *timestamp,
                    completed_time: None,
                    input: input.clone(),
                    output: None,
                    failure_reason: None,
                },
                events: Vec::new(),
                etag: None,
                blob_names: Vec::new(),
            });
        instance_record.latest = Some(instance.execution_id.clone());
        Ok(())
    }

    async fn get_state(
        &self,
        instance_id: &InstanceId,
        all_executions: bool,
    ) -> Result<Vec<OrchestrationState>, StoreError> {
        let guard = self.inner.read().await;
        let Some(instance) = guard.instances.get(instance_id) else {
            return Ok(Vec::new());
        };
        if all_executions {
            let mut rows: Vec<OrchestrationState> = instance
                .executions
                .values()
                .map(|r| r.summary.clone())
                .collect();
            rows.sort_by_key(|r| r.created_time);
            Ok(rows)
        } else {
            Ok(instance
                .latest
                .as_ref()
                .and_then(|id| instance.executions.get(id))
                .map(|r| vec![r.summary.clone()])
                .unwrap_or_default())
        }
    }

    async fn get_state_for_execution(
        &self,
        instance_id: &InstanceId,
        execution_id: &ExecutionId,
    ) -> Result<Option<OrchestrationState>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .instances
            .get(instance_id)
            .and_then(|i| i.executions.get(execution_id))
            .map(|r| r.summary.clone()))
    }

    async fn query_state(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<Vec<OrchestrationState>, StoreError> {
        let guard = self.inner.read().await;
        let mut rows: Vec<OrchestrationState> = guard
            .instances
            .values()
            .filter_map(|i| {
                i.latest
                    .as_ref()
                    .and_then(|id| i.executions.get(id))
                    .map(|r| r.summary.clone())
            })
            .filter(|row| filter.matches(row))
            .collect();
        rows.sort_by_key(|r| r.created_time);
        Ok(rows)
    }

    async fn rewind_history(&self, instance_id: &InstanceId) -> Result<Vec<InstanceId>, StoreError> {
        let mut guard = self.inner.write().await;
        let instance = guard
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;
        let latest = instance
            .latest
            .clone()
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;
        let record = instance
            .executions
            .get_mut(&latest)
            .ok_or_else(|| StoreError::NotFound(format!("instance {instance_id}")))?;

        let mut neutralized = 0usize;
        for event in record.events.iter_mut() {
            let failed = match event {
                HistoryEvent::TaskFailed {
                    event_id,
                    timestamp,
                    ..
                }
                | HistoryEvent::ExecutionFailed {
                    event_id,
                    timestamp,
                    ..
                } => Some((*event_id, *timestamp)),
                _ => None,
            };
            if let Some((event_id, timestamp)) = failed {
                *event = HistoryEvent::GenericEvent {
                    event_id,
                    timestamp,
                    data: None,
                };
                neutralized += 1;
            }
        }
        if neutralized == 0 {
            return Err(StoreError::NotFound(format!(
                "no failed events to rewind for {instance_id}"
            )));
        }

        // Recompute the row from the neutralized history and put the instance
        // back in line for dispatch.
        let replayed = OrchestrationRuntimeState::from_history(record.events.clone());
        let previous = record.summary.clone();
        let mut summary = summary_from_state(&replayed, &previous.instance, Some(&previous));
        summary.status = OrchestrationStatus::Pending;
        summary.completed_time = None;
        summary.failure_reason = None;
        record.summary = summary;
        record.etag = Some(fresh_etag());

        // Sub-orchestrations are not modeled; there are never descendants to
        // revive.
        Ok(Vec::new())
    }

    async fn purge_instance_history(
        &self,
        instance_id: &InstanceId,
    ) -> Result<PurgeResult, StoreError> {
        let mut guard = self.inner.write().await;
        match guard.instances.remove(instance_id) {
            Some(record) => Ok(PurgeResult {
                purged_instances: vec![instance_id.clone()],
                blobs_to_delete: record
                    .executions
                    .into_values()
                    .flat_map(|r| r.blob_names)
                    .collect(),
            }),
            None => Ok(PurgeResult::default()),
        }
    }

    async fn purge_by_filter(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<PurgeResult, StoreError> {
        let matching: Vec<InstanceId> = {
            let guard = self.inner.read().await;
            guard
                .instances
                .iter()
                .filter(|(_, i)| {
                    i.latest
                        .as_ref()
                        .and_then(|id| i.executions.get(id))
                        .is_some_and(|r| filter.matches(&r.summary))
                })
                .map(|(id, _)| id.clone())
                .collect()
        };

        let mut result = PurgeResult::default();
        for instance_id in matching {
            let purged = self.purge_instance_history(&instance_id).await?;
            result.purged_instances.extend(purged.purged_instances);
            result.blobs_to_delete.extend(purged.blobs_to_delete);
        }
        Ok(result)
    }
}
