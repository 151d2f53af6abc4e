use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskhub_config::TaskHubSettings;
use taskhub_domain::{
    control_queue_name, large_message_container_name, partition_index, work_item_queue_name,
    HistoryEvent, InstanceId, OrchestrationRuntimeState, TaskHubInfo, TaskMessage,
};
use taskhub_partition::{PartitionManager, PartitionObserver, ReleaseReason};
use taskhub_queue::{ControlQueue, LargeMessageCodec, MessageData, WorkItemQueue};
use taskhub_session::SessionManager;
use taskhub_store::{HistoryStore, Lease, LeaseStore, StorageBackend};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::hub::InitCell;
use crate::stats::ServiceStats;
use crate::work_item::{TaskActivityWorkItem, TaskOrchestrationWorkItem};

/// How long an idle partition pump or activity poller sleeps between
/// dequeue attempts.
const IDLE_POLL_DELAY: Duration = Duration::from_millis(100);
const STATS_INTERVAL: Duration = Duration::from_secs(30);

// ── Partition pumps ───────────────────────────────────────────────────────────

/// Observer wiring a partition lease to a dequeue pump. Acquisition spawns a
/// loop feeding the session manager; release cancels the loop, drains the
/// partition's sessions and abandons whatever they still held.
struct QueuePumps {
    session_manager: Arc<SessionManager>,
    control_queues: Arc<HashMap<String, Arc<ControlQueue>>>,
    pumps: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    stats: Arc<ServiceStats>,
}

#[async_trait]
impl PartitionObserver for QueuePumps {
    async fn lease_acquired(&self, lease: &Lease) {
        let Some(queue) = self.control_queues.get(&lease.partition_id) else {
            warn!(partition_id = %lease.partition_id, "acquired lease for unknown partition");
            return;
        };
        let token = self.shutdown.child_token();
        let previous = self
            .pumps
            .lock()
            .await
            .insert(lease.partition_id.clone(), token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        let queue = queue.clone();
        let session_manager = self.session_manager.clone();
        let stats = self.stats.clone();
        let partition_id = lease.partition_id.clone();
        tokio::spawn(async move {
            debug!(partition_id = %partition_id, "partition pump started");
            loop {
                if token.is_cancelled() {
                    break;
                }
                match queue.dequeue_batch().await {
                    Ok(batch) if !batch.is_empty() => {
                        ServiceStats::add(&stats.messages_read, batch.len() as u64);
                        session_manager.add_message_batch(&partition_id, batch).await;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(partition_id = %partition_id, error = %e, "control queue dequeue failed");
                    }
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL_DELAY) => {}
                }
            }
            debug!(partition_id = %partition_id, "partition pump stopped");
        });
    }

    async fn lease_released(&self, lease: &Lease, reason: ReleaseReason) {
        if let Some(token) = self.pumps.lock().await.remove(&lease.partition_id) {
            token.cancel();
        }
        let orphaned = self
            .session_manager
            .drain_partition(&lease.partition_id)
            .await;
        info!(
            partition_id = %lease.partition_id,
            reason = %reason,
            orphaned = orphaned.len(),
            "partition released"
        );
        // Put undispatched messages straight back. On a lost lease the
        // receipts may already be stale; the visibility timeout re-delivers.
        if let Some(queue) = self.control_queues.get(&lease.partition_id) {
            for message in orphaned {
                if let Err(e) = queue.abandon(&message).await {
                    debug!(
                        partition_id = %lease.partition_id,
                        error = %e,
                        "orphaned message abandon failed"
                    );
                }
            }
        }
    }
}

// ── OrchestrationService ──────────────────────────────────────────────────────

enum Dispatch {
    Executable,
    /// Terminal state but the batch starts a fresh execution id
    /// (ContinueAsNew continuation).
    FreshExecution,
    Discard,
}

/// The facade tying the partitioned queues, leases, sessions and history
/// together into the work-item and client contracts.
pub struct OrchestrationService {
    pub(crate) settings: TaskHubSettings,
    pub(crate) lease_store: Arc<dyn LeaseStore>,
    pub(crate) history_store: Arc<dyn HistoryStore>,
    pub(crate) codec: Arc<LargeMessageCodec>,
    pub(crate) control_queues: Arc<HashMap<String, Arc<ControlQueue>>>,
    pub(crate) work_item_queue: Arc<WorkItemQueue>,
    pub(crate) session_manager: Arc<SessionManager>,
    partition_manager: PartitionManager,
    pub(crate) storage: Arc<Semaphore>,
    pub(crate) shutdown: CancellationToken,
    pub stats: Arc<ServiceStats>,
    hub_init: InitCell,
    stats_loop: Mutex<Option<JoinHandle<()>>>,
}

impl OrchestrationService {
    pub fn new(
        settings: TaskHubSettings,
        backend: Arc<dyn StorageBackend>,
    ) -> Result<Self, ServiceError> {
        settings.validate()?;
        let hub = settings.task_hub_name.clone();

        let codec = Arc::new(LargeMessageCodec::new(
            backend.container(&large_message_container_name(&hub)),
        ));
        let work_item_queue = Arc::new(WorkItemQueue::new(
            backend.queue(&work_item_queue_name(&hub)),
            codec.clone(),
            settings.work_item_queue_visibility_timeout,
        ));
        let mut queues = HashMap::new();
        for partition in 0..settings.partition_count {
            let name = control_queue_name(&hub, partition);
            queues.insert(
                name.clone(),
                Arc::new(ControlQueue::new(
                    backend.queue(&name),
                    codec.clone(),
                    settings.control_queue_batch_size,
                    settings.control_queue_visibility_timeout,
                )),
            );
        }
        let control_queues = Arc::new(queues);

        let history_store = backend.history_store();
        let session_manager = Arc::new(SessionManager::new(
            history_store.clone(),
            settings.extended_sessions_enabled,
        ));
        let stats = Arc::new(ServiceStats::default());
        let shutdown = CancellationToken::new();

        let pumps = Arc::new(QueuePumps {
            session_manager: session_manager.clone(),
            control_queues: control_queues.clone(),
            pumps: Mutex::new(HashMap::new()),
            shutdown: shutdown.clone(),
            stats: stats.clone(),
        });
        let partition_manager =
            PartitionManager::new(&settings, backend.lease_store(), pumps);

        Ok(Self {
            storage: Arc::new(Semaphore::new(settings.max_storage_operation_concurrency)),
            lease_store: backend.lease_store(),
            history_store,
            codec,
            control_queues,
            work_item_queue,
            session_manager,
            partition_manager,
            shutdown,
            stats,
            hub_init: InitCell::new(),
            stats_loop: Mutex::new(None),
            settings,
        })
    }

    // ── Hub lifecycle ────────────────────────────────────────────────────────

    /// Idempotently create queues, leases and the hub sentinel. Fails fast
    /// when the hub exists with a different partition count.
    pub async fn create_task_hub_if_not_exists(&self) -> Result<(), ServiceError> {
        self.hub_init
            .get_or_init(async {
                let hub_info = TaskHubInfo::new(
                    &self.settings.task_hub_name,
                    self.settings.partition_count,
                )?;
                self.lease_store
                    .create_lease_store_if_not_exists(&hub_info)
                    .await?;
                let stored = self
                    .lease_store
                    .get_or_create_task_hub_info(hub_info)
                    .await?;
                if stored.partition_count != self.settings.partition_count {
                    return Err(ServiceError::PartitionCountMismatch {
                        task_hub_name: self.settings.task_hub_name.clone(),
                        stored: stored.partition_count,
                        configured: self.settings.partition_count,
                    });
                }

                self.history_store.create_if_not_exists().await?;
                for (partition_id, queue) in self.control_queues.iter() {
                    self.lease_store
                        .create_lease_if_not_exists(partition_id)
                        .await?;
                    queue.ensure_exists().await?;
                }
                self.work_item_queue.ensure_exists().await?;
                info!(
                    task_hub = %self.settings.task_hub_name,
                    partitions = self.settings.partition_count,
                    "task hub ready"
                );
                Ok(())
            })
            .await
    }

    /// Bring the worker online: hub resources, lease loops, stats loop.
    pub async fn start(&self) -> Result<(), ServiceError> {
        self.create_task_hub_if_not_exists().await?;
        self.partition_manager.initialize().await?;
        self.partition_manager.start().await?;

        let mut stats_loop = self.stats_loop.lock().await;
        if stats_loop.is_none() {
            let stats = self.stats.clone();
            let shutdown = self.shutdown.clone();
            let work_item_queue = self.work_item_queue.clone();
            *stats_loop = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(STATS_INTERVAL) => {}
                    }
                    let snapshot = stats.snapshot();
                    let backlog = work_item_queue.approximate_length().await.unwrap_or(0);
                    debug!(
                        messages_read = snapshot.messages_read,
                        messages_sent = snapshot.messages_sent,
                        checkpoints = snapshot.checkpoints_committed,
                        conflicts = snapshot.checkpoint_conflicts,
                        work_item_backlog = backlog,
                        "service stats"
                    );
                }
            }));
        }
        info!(worker_id = %self.settings.worker_id, "orchestration service started");
        Ok(())
    }

    /// Orderly shutdown: stop dispatching, stop renewing, release leases,
    /// finalize stats.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        self.partition_manager.stop().await;
        if let Some(handle) = self.stats_loop.lock().await.take() {
            let _ = handle.await;
        }
        let snapshot = self.stats.snapshot();
        info!(
            worker_id = %self.settings.worker_id,
            messages_read = snapshot.messages_read,
            messages_sent = snapshot.messages_sent,
            checkpoints = snapshot.checkpoints_committed,
            "orchestration service stopped"
        );
    }

    pub fn settings(&self) -> &TaskHubSettings {
        &self.settings
    }

    pub async fn owned_partitions(&self) -> Vec<String> {
        self.partition_manager.owned_partitions().await
    }

    // ── Internal plumbing ────────────────────────────────────────────────────

    pub(crate) fn control_queue_for_partition(
        &self,
        partition_id: &str,
    ) -> Result<Arc<ControlQueue>, ServiceError> {
        self.control_queues
            .get(partition_id)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidWorkItem(format!("unknown partition {partition_id}")))
    }

    pub(crate) fn control_queue_for_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Arc<ControlQueue>, ServiceError> {
        let partition = partition_index(instance_id, self.settings.partition_count);
        self.control_queue_for_partition(&control_queue_name(
            &self.settings.task_hub_name,
            partition,
        ))
    }

    /// Enqueue one orchestrator-bound message onto its instance's partition,
    /// bounded by the storage semaphore.
    pub(crate) async fn send_to_partition(
        &self,
        message: &TaskMessage,
    ) -> Result<(), ServiceError> {
        let queue = self.control_queue_for_instance(&message.instance.instance_id)?;
        // The semaphore is never closed.
        let _permit = self.storage.acquire().await.ok();
        queue.enqueue(message).await?;
        ServiceStats::bump(&self.stats.messages_sent);
        Ok(())
    }

    /// A token that cancels when the caller's context cancels, the service
    /// shuts down, or `after` elapses.
    pub(crate) fn linked_deadline(
        &self,
        ctx: &CancellationToken,
        after: Duration,
    ) -> (CancellationToken, JoinHandle<()>) {
        let token = ctx.child_token();
        let trigger = token.clone();
        let shutdown = self.shutdown.clone();
        let guard = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(after) => {}
                _ = shutdown.cancelled() => {}
            }
            trigger.cancel();
        });
        (token, guard)
    }

    // ── Orchestration work items ─────────────────────────────────────────────

    /// Wait up to `receive_timeout` for the next executable orchestration
    /// session. Batches for unknown or finished instances are deleted and
    /// skipped.
    pub async fn lock_next_task_orchestration_work_item(
        &self,
        receive_timeout: Duration,
        ctx: &CancellationToken,
    ) -> Result<Option<TaskOrchestrationWorkItem>, ServiceError> {
        let (token, guard) = self.linked_deadline(ctx, receive_timeout);
        let result = self.next_orchestration_work_item(&token).await;
        guard.abort();
        result
    }

    async fn next_orchestration_work_item(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<TaskOrchestrationWorkItem>, ServiceError> {
        loop {
            let Some(mut session) = self.session_manager.get_next_session(token).await? else {
                return Ok(None);
            };
            ServiceStats::bump(&self.stats.sessions_leased);

            match classify(&session.runtime_state, &session.current_batch) {
                Dispatch::Executable => {
                    return Ok(Some(TaskOrchestrationWorkItem { session }));
                }
                Dispatch::FreshExecution => {
                    // ContinueAsNew continuation: the new execution starts
                    // from empty history under its own ETag.
                    session.runtime_state = OrchestrationRuntimeState::default();
                    session.etag = None;
                    return Ok(Some(TaskOrchestrationWorkItem { session }));
                }
                Dispatch::Discard => {
                    warn!(
                        instance_id = %session.instance_id,
                        batch = session.current_batch.len(),
                        "discarding messages for non-executable instance"
                    );
                    ServiceStats::bump(&self.stats.work_items_discarded);
                    let queue = self.control_queue_for_partition(&session.partition_id)?;
                    for message in &session.current_batch {
                        if let Err(e) = queue.delete(message).await {
                            debug!(error = %e, "discard delete failed");
                        }
                    }
                    self.session_manager
                        .abandon_session(&session.instance_id)
                        .await;
                }
            }
        }
    }

    /// Extend the visibility of every message in the work item's batch.
    pub async fn renew_task_orchestration_work_item_lock(
        &self,
        work_item: &mut TaskOrchestrationWorkItem,
    ) -> Result<(), ServiceError> {
        let queue = self.control_queue_for_partition(&work_item.session.partition_id)?;
        for message in work_item.session.current_batch.iter_mut() {
            queue.renew(message).await?;
        }
        Ok(())
    }

    /// Failed turn: restore every inbound message's visibility immediately
    /// and drop the session state.
    pub async fn abandon_task_orchestration_work_item(
        &self,
        work_item: TaskOrchestrationWorkItem,
    ) -> Result<(), ServiceError> {
        let queue = self.control_queue_for_partition(&work_item.session.partition_id)?;
        for message in &work_item.session.current_batch {
            if let Err(e) = queue.abandon(message).await {
                debug!(
                    instance_id = %work_item.session.instance_id,
                    error = %e,
                    "abandon failed; visibility timeout will re-deliver"
                );
            }
        }
        self.session_manager
            .abandon_session(&work_item.session.instance_id)
            .await;
        Ok(())
    }

    /// Hand the session back to the manager once the host is done with the
    /// work item.
    pub async fn release_task_orchestration_work_item(
        &self,
        work_item: TaskOrchestrationWorkItem,
    ) -> Result<(), ServiceError> {
        let session = work_item.session;
        let still_owns = self
            .partition_manager
            .owns_partition(&session.partition_id)
            .await;
        self.session_manager
            .release_session(
                &session.instance_id,
                session.runtime_state,
                session.etag,
                still_owns,
            )
            .await;
        ServiceStats::bump(&self.stats.sessions_released);
        Ok(())
    }

    // ── Activity work items ──────────────────────────────────────────────────

    /// Wait up to `receive_timeout` for the next activity invocation.
    pub async fn lock_next_task_activity_work_item(
        &self,
        receive_timeout: Duration,
        ctx: &CancellationToken,
    ) -> Result<Option<TaskActivityWorkItem>, ServiceError> {
        let (token, guard) = self.linked_deadline(ctx, receive_timeout);
        let result = loop {
            match self.work_item_queue.dequeue().await {
                Ok(Some(message)) => break Ok(Some(TaskActivityWorkItem { message })),
                Ok(None) => {}
                Err(e) => break Err(e.into()),
            }
            tokio::select! {
                _ = token.cancelled() => break Ok(None),
                _ = tokio::time::sleep(IDLE_POLL_DELAY) => {}
            }
        };
        guard.abort();
        result
    }

    pub async fn renew_task_activity_work_item_lock(
        &self,
        work_item: &mut TaskActivityWorkItem,
    ) -> Result<(), ServiceError> {
        self.work_item_queue.renew(&mut work_item.message).await?;
        Ok(())
    }

    /// Post the activity's response to the orchestrator, then retire the
    /// inbound invocation. Crashing between the two yields a duplicate
    /// response, which replay drops by event id.
    pub async fn complete_task_activity_work_item(
        &self,
        work_item: TaskActivityWorkItem,
        response: TaskMessage,
    ) -> Result<(), ServiceError> {
        self.send_to_partition(&response).await?;
        self.work_item_queue.delete(&work_item.message).await?;
        ServiceStats::bump(&self.stats.activities_completed);
        Ok(())
    }

    pub async fn abandon_task_activity_work_item(
        &self,
        work_item: TaskActivityWorkItem,
    ) -> Result<(), ServiceError> {
        self.work_item_queue.abandon(&work_item.message).await?;
        Ok(())
    }
}

/// Decide what to do with a leased-out batch given the instance's state.
fn classify(state: &OrchestrationRuntimeState, batch: &[MessageData]) -> Dispatch {
    let starts_execution = |message: &MessageData| {
        matches!(
            message.task_message.event,
            HistoryEvent::ExecutionStarted { .. }
        )
    };

    if !state.has_started() {
        if batch.iter().any(starts_execution) {
            return Dispatch::Executable;
        }
        return Dispatch::Discard;
    }
    if state.status().is_terminal() {
        let current_execution = state.instance().map(|i| i.execution_id.clone());
        let fresh = batch.iter().any(|message| {
            starts_execution(message)
                && Some(&message.task_message.instance.execution_id) != current_execution.as_ref()
        });
        if fresh {
            return Dispatch::FreshExecution;
        }
        return Dispatch::Discard;
    }
    Dispatch::Executable
}
