use futures::future::{join_all, BoxFuture};
use taskhub_domain::{OrchestrationRuntimeState, TaskMessage};
use taskhub_store::StoreError;
use tracing::{debug, error, warn};

use crate::error::ServiceError;
use crate::service::OrchestrationService;
use crate::stats::ServiceStats;
use crate::work_item::TaskOrchestrationWorkItem;

impl OrchestrationService {
    /// The three-phase checkpoint advancing one orchestration turn.
    ///
    /// Phase 1 enqueues every outbound message (activity invocations onto the
    /// work-item queue, orchestrator messages onto their hash partition,
    /// timers and the ContinueAsNew continuation onto the current partition),
    /// in parallel under the storage semaphore. Phase 2 commits the new
    /// history guarded by the session's ETag. Phase 3 deletes the inbound
    /// batch.
    ///
    /// A crash after phase 1 re-runs the turn and enqueues duplicates, which
    /// downstream replay drops by event id. A stale ETag in phase 2 means
    /// another worker advanced the instance: the inbound batch is abandoned
    /// for re-delivery and the call returns recovered. A crash after phase 2
    /// re-delivers the inbound batch against history that already contains
    /// its effects, a no-op replay.
    pub async fn complete_task_orchestration_work_item(
        &self,
        work_item: &mut TaskOrchestrationWorkItem,
        new_runtime_state: OrchestrationRuntimeState,
        outbound: Vec<TaskMessage>,
        orchestrator_messages: Vec<TaskMessage>,
        timer_messages: Vec<TaskMessage>,
        continued_as_new: Option<TaskMessage>,
    ) -> Result<(), ServiceError> {
        let instance = new_runtime_state.instance().cloned().ok_or_else(|| {
            ServiceError::InvalidWorkItem("runtime state has no execution started".into())
        })?;
        let current_queue = self.control_queue_for_partition(&work_item.session.partition_id)?;

        // ── Phase 1: commit outbound messages ───────────────────────────────
        let mut sends: Vec<BoxFuture<'_, Result<(), ServiceError>>> = Vec::new();
        for message in orchestrator_messages {
            sends.push(Box::pin(
                async move { self.send_to_partition(&message).await },
            ));
        }
        for message in timer_messages.into_iter().chain(continued_as_new) {
            let queue = current_queue.clone();
            sends.push(Box::pin(async move {
                let _permit = self.storage.acquire().await.ok();
                queue.enqueue(&message).await?;
                ServiceStats::bump(&self.stats.messages_sent);
                Ok(())
            }));
        }
        for message in outbound {
            let queue = self.work_item_queue.clone();
            sends.push(Box::pin(async move {
                let _permit = self.storage.acquire().await.ok();
                queue.enqueue(&message).await?;
                ServiceStats::bump(&self.stats.messages_sent);
                Ok(())
            }));
        }
        let send_count = sends.len();
        if let Some(err) = join_all(sends).await.into_iter().find_map(Result::err) {
            // Some sends may have landed; retrying the turn re-sends them and
            // replay dedups downstream.
            error!(
                instance_id = %instance.instance_id,
                error = %err,
                "checkpoint aborted enqueuing outbound messages"
            );
            self.session_manager
                .abandon_session(&work_item.session.instance_id)
                .await;
            return Err(err);
        }
        debug!(
            instance_id = %instance.instance_id,
            outbound = send_count,
            "checkpoint phase 1 committed"
        );

        // ── Phase 2: commit history ─────────────────────────────────────────
        match self
            .history_store
            .update_state(
                &new_runtime_state,
                &instance,
                work_item.session.etag.as_deref(),
                &[],
            )
            .await
        {
            Ok(etag) => {
                work_item.session.etag = Some(etag);
                ServiceStats::bump(&self.stats.checkpoints_committed);
            }
            Err(StoreError::PreconditionFailed(message)) => {
                // Another worker advanced this instance. Hand the batch back
                // and let the re-delivery replay against the newer history.
                warn!(
                    instance_id = %instance.instance_id,
                    message,
                    "checkpoint lost the history race, abandoning batch"
                );
                ServiceStats::bump(&self.stats.checkpoint_conflicts);
                let batch = std::mem::take(&mut work_item.session.current_batch);
                for inbound in &batch {
                    if let Err(e) = current_queue.abandon(inbound).await {
                        debug!(error = %e, "abandon after conflict failed");
                    }
                }
                self.session_manager
                    .abandon_session(&work_item.session.instance_id)
                    .await;
                return Ok(());
            }
            Err(other) => {
                error!(
                    instance_id = %instance.instance_id,
                    error = %other,
                    "checkpoint history commit failed"
                );
                self.session_manager
                    .abandon_session(&work_item.session.instance_id)
                    .await;
                return Err(other.into());
            }
        }

        // ── Phase 3: delete inbound ─────────────────────────────────────────
        let batch = std::mem::take(&mut work_item.session.current_batch);
        let deletes = batch.iter().map(|inbound| {
            let queue = current_queue.clone();
            async move {
                let _permit = self.storage.acquire().await.ok();
                queue.delete(inbound).await
            }
        });
        for result in join_all(deletes).await {
            if let Err(e) = result {
                // The message comes back after its visibility timeout and
                // replays as a no-op.
                warn!(
                    instance_id = %instance.instance_id,
                    error = %e,
                    "inbound delete failed"
                );
            }
        }

        // The committed history is the session's new baseline.
        work_item.session.runtime_state =
            OrchestrationRuntimeState::from_history(new_runtime_state.full_history());
        debug!(
            instance_id = %instance.instance_id,
            inbound = batch.len(),
            "checkpoint complete"
        );
        Ok(())
    }
}
