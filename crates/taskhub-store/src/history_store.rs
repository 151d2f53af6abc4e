use async_trait::async_trait;
use taskhub_domain::{
    ExecutionId, HistoryEvent, InstanceId, OrchestrationInstance, OrchestrationRuntimeState,
    OrchestrationState, OrchestrationStateFilter,
};

use crate::error::StoreError;

/// Committed history of one execution plus the ETag guarding it.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub events: Vec<HistoryEvent>,
    pub etag: String,
}

/// What a purge removed. Large-message blobs referenced by the purged rows
/// are returned for the caller to delete; the history store does not reach
/// into the blob store.
#[derive(Debug, Clone, Default)]
pub struct PurgeResult {
    pub purged_instances: Vec<InstanceId>,
    pub blobs_to_delete: Vec<String>,
}

/// Durable, optimistic-concurrency-controlled store of orchestration state.
///
/// `update_state` must be all-or-nothing per `(instance, execution)`: an
/// implementation that persists events as batched row writes must stage the
/// whole batch and order it so the summary-row update lands last, so a
/// failure never leaves the summary pointing at a partial append.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    async fn create_if_not_exists(&self) -> Result<(), StoreError>;

    /// History for the named execution, or the latest execution when
    /// `execution_id` is `None`. `Ok(None)` when the instance is unknown.
    async fn get_history(
        &self,
        instance_id: &InstanceId,
        execution_id: Option<&ExecutionId>,
    ) -> Result<Option<HistoryRecord>, StoreError>;

    /// Commit `new_state`'s full history guarded by `expected_etag`
    /// (`None` = the execution must not exist yet). Returns the new ETag, or
    /// `PreconditionFailed` on a stale guard. `event_blob_names` records
    /// large-message blobs the committed events reference, for later purge.
    async fn update_state(
        &self,
        new_state: &OrchestrationRuntimeState,
        instance: &OrchestrationInstance,
        expected_etag: Option<&str>,
        event_blob_names: &[String],
    ) -> Result<String, StoreError>;

    /// Allocate or advance the instance summary row for a fresh execution.
    /// `execution_started` must be an `ExecutionStarted` event.
    async fn set_new_execution(&self, execution_started: &HistoryEvent) -> Result<(), StoreError>;

    /// Summary rows for one instance: the latest execution, or all of them.
    async fn get_state(
        &self,
        instance_id: &InstanceId,
        all_executions: bool,
    ) -> Result<Vec<OrchestrationState>, StoreError>;

    async fn get_state_for_execution(
        &self,
        instance_id: &InstanceId,
        execution_id: &ExecutionId,
    ) -> Result<Option<OrchestrationState>, StoreError>;

    async fn query_state(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<Vec<OrchestrationState>, StoreError>;

    /// Neutralize failure events in the latest execution so replay yields a
    /// live state, and reset the summary row to Pending. Returns the ids of
    /// descendant instances that also need revival.
    async fn rewind_history(&self, instance_id: &InstanceId) -> Result<Vec<InstanceId>, StoreError>;

    async fn purge_instance_history(
        &self,
        instance_id: &InstanceId,
    ) -> Result<PurgeResult, StoreError>;

    async fn purge_by_filter(
        &self,
        filter: &OrchestrationStateFilter,
    ) -> Result<PurgeResult, StoreError>;
}
