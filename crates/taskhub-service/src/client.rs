use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use taskhub_domain::{
    ExecutionId, HistoryEvent, InstanceId, OrchestrationState, OrchestrationStateFilter,
    OrchestrationStatus, TaskMessage,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::ServiceError;
use crate::service::OrchestrationService;

/// How often `wait_for_orchestration` re-reads the instance status.
const WAIT_POLL_INTERVAL: Duration = Duration::from_secs(2);

impl OrchestrationService {
    // ── Creation and messaging ───────────────────────────────────────────────

    /// Start a new orchestration instance. `creation_message` must carry an
    /// `ExecutionStarted` event.
    ///
    /// With `dedupe_statuses`, an existing instance whose status is not in
    /// the set blocks the creation; statuses in the set (typically the
    /// terminal ones) are overwritten by a fresh execution.
    pub async fn create_task_orchestration(
        &self,
        creation_message: TaskMessage,
        dedupe_statuses: Option<&[OrchestrationStatus]>,
    ) -> Result<(), ServiceError> {
        self.create_task_hub_if_not_exists().await?;
        let HistoryEvent::ExecutionStarted { .. } = &creation_message.event else {
            return Err(ServiceError::InvalidWorkItem(format!(
                "creation message must carry ExecutionStarted, got {}",
                creation_message.event.kind()
            )));
        };

        let instance_id = &creation_message.instance.instance_id;
        if let Some(dedupe_statuses) = dedupe_statuses {
            let existing = self.history_store.get_state(instance_id, false).await?;
            if let Some(existing) = existing.first() {
                if !dedupe_statuses.contains(&existing.status) {
                    return Err(ServiceError::InstanceAlreadyExists(instance_id.clone()));
                }
            }
        }

        self.history_store
            .set_new_execution(&creation_message.event)
            .await?;
        self.send_to_partition(&creation_message).await?;
        info!(
            instance_id = %creation_message.instance.instance_id,
            execution_id = %creation_message.instance.execution_id,
            "orchestration created"
        );
        Ok(())
    }

    /// Route one orchestrator-bound message to its instance's partition.
    pub async fn send_task_orchestration_message(
        &self,
        message: TaskMessage,
    ) -> Result<(), ServiceError> {
        self.create_task_hub_if_not_exists().await?;
        self.send_to_partition(&message).await
    }

    pub async fn send_task_orchestration_message_batch(
        &self,
        messages: Vec<TaskMessage>,
    ) -> Result<(), ServiceError> {
        self.create_task_hub_if_not_exists().await?;
        let sends = messages
            .iter()
            .map(|message| self.send_to_partition(message));
        join_all(sends)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(())
    }

    /// Post an `ExecutionTerminated` event; the next work item moves the
    /// instance to Terminated and later messages are discarded.
    pub async fn force_terminate_task_orchestration(
        &self,
        instance_id: &InstanceId,
        reason: &str,
    ) -> Result<(), ServiceError> {
        let latest = self.latest_state(instance_id).await?;
        let message = TaskMessage::new(
            HistoryEvent::ExecutionTerminated {
                event_id: -1,
                timestamp: Utc::now(),
                reason: reason.to_string(),
            },
            latest.instance,
        );
        self.send_task_orchestration_message(message).await
    }

    /// Neutralize the failure events of a failed instance and poke it (and
    /// any descendants the history store reports) back to life.
    pub async fn rewind_task_orchestration(
        &self,
        instance_id: &InstanceId,
        reason: &str,
    ) -> Result<(), ServiceError> {
        self.create_task_hub_if_not_exists().await?;
        let descendants = self.history_store.rewind_history(instance_id).await?;
        info!(
            instance_id = %instance_id,
            descendants = descendants.len(),
            reason,
            "orchestration rewound"
        );

        for target in std::iter::once(instance_id.clone()).chain(descendants) {
            let latest = self.latest_state(&target).await?;
            let revival = TaskMessage::new(
                HistoryEvent::GenericEvent {
                    event_id: -1,
                    timestamp: Utc::now(),
                    data: Some(serde_json::json!({ "rewound": reason })),
                },
                latest.instance,
            );
            self.send_to_partition(&revival).await?;
        }
        Ok(())
    }

    // ── State queries ────────────────────────────────────────────────────────

    /// Summary rows for an instance: the latest execution, or all executions.
    pub async fn get_orchestration_state(
        &self,
        instance_id: &InstanceId,
        all_executions: bool,
    ) -> Result<Vec<OrchestrationState>, ServiceError> {
        Ok(self
            .history_store
            .get_state(instance_id, all_executions)
            .await?)
    }

    pub async fn get_orchestration_state_for_execution(
        &self,
        instance_id: &InstanceId,
        execution_id: &ExecutionId,
    ) -> Result<Option<OrchestrationState>, ServiceError> {
        Ok(self
            .history_store
            .get_state_for_execution(instance_id, execution_id)
            .await?)
    }

    pub async fn query_orchestration_states(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<Vec<OrchestrationState>, ServiceError> {
        Ok(self.history_store.query_state(filter).await?)
    }

    /// The committed history of one execution as a JSON array.
    pub async fn get_orchestration_history(
        &self,
        instance_id: &InstanceId,
        execution_id: &ExecutionId,
    ) -> Result<String, ServiceError> {
        let record = self
            .history_store
            .get_history(instance_id, Some(execution_id))
            .await?
            .ok_or_else(|| ServiceError::InstanceNotFound(instance_id.clone()))?;
        Ok(serde_json::to_string(&record.events).map_err(taskhub_store::StoreError::from)?)
    }

    // ── Purge ────────────────────────────────────────────────────────────────

    /// Remove an instance's history rows and every large-message blob that
    /// belonged to it. Returns the number of purged instances (0 or 1).
    pub async fn purge_instance_history(
        &self,
        instance_id: &InstanceId,
    ) -> Result<usize, ServiceError> {
        let result = self.history_store.purge_instance_history(instance_id).await?;
        for blob_name in &result.blobs_to_delete {
            self.codec.delete_blob(blob_name);
        }
        for purged in &result.purged_instances {
            self.codec.delete_instance_blobs(purged.as_str()).await?;
        }
        Ok(result.purged_instances.len())
    }

    pub async fn purge_history_by_filter(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<usize, ServiceError> {
        let result = self.history_store.purge_by_filter(filter).await?;
        for blob_name in &result.blobs_to_delete {
            self.codec.delete_blob(blob_name);
        }
        for purged in &result.purged_instances {
            self.codec.delete_instance_blobs(purged.as_str()).await?;
        }
        Ok(result.purged_instances.len())
    }

    // ── Waiting ──────────────────────────────────────────────────────────────

    /// Poll until the instance (or the named execution) reaches a terminal
    /// status. `None` on timeout or cancellation.
    pub async fn wait_for_orchestration(
        &self,
        instance_id: &InstanceId,
        execution_id: Option<&ExecutionId>,
        timeout: Duration,
        ctx: &CancellationToken,
    ) -> Result<Option<OrchestrationState>, ServiceError> {
        let (token, guard) = self.linked_deadline(ctx, timeout);
        let result = loop {
            let state = match execution_id {
                Some(execution_id) => {
                    self.history_store
                        .get_state_for_execution(instance_id, execution_id)
                        .await?
                }
                None => self
                    .history_store
                    .get_state(instance_id, false)
                    .await?
                    .into_iter()
                    .next(),
            };
            if let Some(state) = state {
                if state.status.is_terminal() {
                    break Some(state);
                }
            }
            tokio::select! {
                _ = token.cancelled() => break None,
                _ = tokio::time::sleep(WAIT_POLL_INTERVAL) => {}
            }
        };
        guard.abort();
        Ok(result)
    }

    async fn latest_state(
        &self,
        instance_id: &InstanceId,
    ) -> Result<OrchestrationState, ServiceError> {
        self.history_store
            .get_state(instance_id, false)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::InstanceNotFound(instance_id.clone()))
    }
}
