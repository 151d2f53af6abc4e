use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use taskhub_domain::{InstanceId, OrchestrationRuntimeState};
use taskhub_queue::MessageData;
use taskhub_store::HistoryStore;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::OrchestrationSession;

#[derive(Debug, Clone)]
struct CachedState {
    runtime_state: OrchestrationRuntimeState,
    etag: Option<String>,
}

#[derive(Debug)]
struct SessionSlot {
    partition_id: String,
    /// A session for this instance is checked out; new messages coalesce
    /// into `pending` until it comes back.
    leased_out: bool,
    /// In the ready queue awaiting `get_next_session`.
    queued: bool,
    pending: Vec<MessageData>,
    /// Warm state retained across turns when extended sessions are on.
    cached: Option<CachedState>,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<InstanceId, SessionSlot>,
    ready: VecDeque<InstanceId>,
}

/// Turns per-partition message streams into per-instance sessions.
///
/// At most one session exists per instance in this process; while one is
/// leased out, messages for the same instance append to its pending batch
/// and surface on the next turn.
pub struct SessionManager {
    history_store: Arc<dyn HistoryStore>,
    extended_sessions: bool,
    inner: Mutex<Inner>,
    ready_notify: Notify,
}

impl SessionManager {
    pub fn new(history_store: Arc<dyn HistoryStore>, extended_sessions: bool) -> Self {
        Self {
            history_store,
            extended_sessions,
            inner: Mutex::new(Inner::default()),
            ready_notify: Notify::new(),
        }
    }

    /// Feed a dequeued batch from one partition. Messages are grouped per
    /// instance; instances without a checked-out session become ready.
    pub async fn add_message_batch(&self, partition_id: &str, messages: Vec<MessageData>) {
        if messages.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().await;
        let mut woken = 0;
        for message in messages {
            let instance_id = message.instance_id().clone();
            let slot = inner
                .slots
                .entry(instance_id.clone())
                .or_insert_with(|| SessionSlot {
                    partition_id: partition_id.to_string(),
                    leased_out: false,
                    queued: false,
                    pending: Vec::new(),
                    cached: None,
                });
            slot.pending.push(message);
            if !slot.leased_out && !slot.queued {
                slot.queued = true;
                inner.ready.push_back(instance_id);
                woken += 1;
            }
        }
        drop(inner);
        for _ in 0..woken {
            self.ready_notify.notify_one();
        }
    }

    /// Block until a session is ready, lease it out and return it. Returns
    /// `None` once `token` cancels.
    ///
    /// History is loaded on the first turn of an instance; later turns reuse
    /// the cached state when extended sessions are enabled.
    pub async fn get_next_session(
        &self,
        token: &CancellationToken,
    ) -> Result<Option<OrchestrationSession>, SessionError> {
        loop {
            let notified = self.ready_notify.notified();
            if let Some((instance_id, partition_id, batch, cached)) = self.checkout().await {
                let (runtime_state, etag) = match cached {
                    Some(cached) => (cached.runtime_state, cached.etag),
                    None => match self.fetch_state(&instance_id).await {
                        Ok(loaded) => loaded,
                        Err(e) => {
                            // Put everything back so the batch is not lost,
                            // then surface the failure.
                            self.requeue_after_fetch_failure(&instance_id, batch).await;
                            return Err(e);
                        }
                    },
                };
                debug!(
                    instance_id = %instance_id,
                    partition_id = %partition_id,
                    batch = batch.len(),
                    "session leased out"
                );
                return Ok(Some(OrchestrationSession {
                    instance_id,
                    partition_id,
                    etag,
                    runtime_state,
                    current_batch: batch,
                }));
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(None),
                _ = notified => {}
            }
        }
    }

    async fn checkout(
        &self,
    ) -> Option<(InstanceId, String, Vec<MessageData>, Option<CachedState>)> {
        let mut inner = self.inner.lock().await;
        while let Some(instance_id) = inner.ready.pop_front() {
            let Some(slot) = inner.slots.get_mut(&instance_id) else {
                continue;
            };
            slot.queued = false;
            if slot.leased_out || slot.pending.is_empty() {
                continue;
            }
            slot.leased_out = true;
            let batch = std::mem::take(&mut slot.pending);
            let cached = slot.cached.take();
            let partition_id = slot.partition_id.clone();
            return Some((instance_id, partition_id, batch, cached));
        }
        None
    }

    async fn fetch_state(
        &self,
        instance_id: &InstanceId,
    ) -> Result<(OrchestrationRuntimeState, Option<String>), SessionError> {
        match self.history_store.get_history(instance_id, None).await? {
            Some(record) => Ok((
                OrchestrationRuntimeState::from_history(record.events),
                Some(record.etag),
            )),
            None => Ok((OrchestrationRuntimeState::default(), None)),
        }
    }

    async fn requeue_after_fetch_failure(&self, instance_id: &InstanceId, batch: Vec<MessageData>) {
        let mut inner = self.inner.lock().await;
        if let Some(slot) = inner.slots.get_mut(instance_id) {
            slot.leased_out = false;
            let mut restored = batch;
            restored.append(&mut slot.pending);
            slot.pending = restored;
            if !slot.queued && !slot.pending.is_empty() {
                slot.queued = true;
                inner.ready.push_back(instance_id.clone());
                drop(inner);
                self.ready_notify.notify_one();
            }
        }
    }

    /// Give a session back after a successful turn. The next pending batch
    /// (if any) makes the instance ready again; otherwise the slot is kept
    /// warm only when extended sessions are on and the worker still owns the
    /// partition.
    pub async fn release_session(
        &self,
        instance_id: &InstanceId,
        runtime_state: OrchestrationRuntimeState,
        etag: Option<String>,
        still_owns_partition: bool,
    ) {
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.slots.get_mut(instance_id) else {
            return;
        };
        slot.leased_out = false;
        let keep_warm = self.extended_sessions && still_owns_partition;
        if keep_warm {
            slot.cached = Some(CachedState {
                runtime_state,
                etag,
            });
        }
        if !slot.pending.is_empty() {
            if !slot.queued {
                slot.queued = true;
                inner.ready.push_back(instance_id.clone());
                drop(inner);
                self.ready_notify.notify_one();
            }
        } else if !keep_warm {
            inner.slots.remove(instance_id);
        }
    }

    /// Give a session back after a failed turn. The cached state is dropped
    /// (the caller abandoned the batch, so it will be re-delivered and
    /// replayed from durable history).
    pub async fn abandon_session(&self, instance_id: &InstanceId) {
        let mut inner = self.inner.lock().await;
        let Some(slot) = inner.slots.get_mut(instance_id) else {
            return;
        };
        slot.leased_out = false;
        slot.cached = None;
        if !slot.pending.is_empty() {
            if !slot.queued {
                slot.queued = true;
                inner.ready.push_back(instance_id.clone());
                drop(inner);
                self.ready_notify.notify_one();
            }
        } else {
            inner.slots.remove(instance_id);
        }
    }

    /// Drop every session bound to a partition whose lease was lost. Pending
    /// messages are handed back for the caller to abandon; checked-out
    /// batches stay with their work items, whose release becomes a no-op.
    pub async fn drain_partition(&self, partition_id: &str) -> Vec<MessageData> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<InstanceId> = inner
            .slots
            .iter()
            .filter(|(_, slot)| slot.partition_id == partition_id)
            .map(|(id, _)| id.clone())
            .collect();
        let mut orphaned = Vec::new();
        for instance_id in doomed {
            if let Some(slot) = inner.slots.remove(&instance_id) {
                if slot.leased_out {
                    warn!(
                        instance_id = %instance_id,
                        partition_id,
                        "dropping session with a work item in flight"
                    );
                }
                orphaned.extend(slot.pending);
            }
        }
        let Inner { slots, ready } = &mut *inner;
        ready.retain(|id| slots.contains_key(id));
        orphaned
    }

    pub async fn active_sessions(&self) -> usize {
        self.inner.lock().await.slots.len()
    }
}
