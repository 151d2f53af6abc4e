use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use taskhub_config::TaskHubSettings;
use taskhub_domain::WorkerId;
use taskhub_store::{
    with_retries, AcquireOutcome, Lease, LeaseStore, ReleaseOutcome, RenewOutcome, RetryPolicy,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PartitionError;
use crate::observer::{PartitionObserver, ReleaseReason};

struct Shared {
    worker_id: WorkerId,
    lease_interval: Duration,
    renew_interval: Duration,
    acquire_interval: Duration,
    lease_store: Arc<dyn LeaseStore>,
    observer: Arc<dyn PartitionObserver>,
    owned: Mutex<HashMap<String, Lease>>,
    shutdown: CancellationToken,
}

/// Continuously drives this worker's ownership of a balanced share of the
/// hub's partitions.
///
/// Two cooperating loops: the acquire loop scans every
/// `lease_acquire_interval` and takes unowned or expired leases up to the
/// balanced target `⌈total / active_workers⌉`, stealing at most one lease per
/// scan from the most-loaded peer when nothing free remains; the renew loop
/// heartbeats every `lease_renew_interval` and surfaces lost leases to the
/// observer.
pub struct PartitionManager {
    shared: Arc<Shared>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl PartitionManager {
    pub fn new(
        settings: &TaskHubSettings,
        lease_store: Arc<dyn LeaseStore>,
        observer: Arc<dyn PartitionObserver>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                worker_id: settings.worker_id.clone(),
                lease_interval: settings.lease_interval,
                renew_interval: settings.lease_renew_interval,
                acquire_interval: settings.lease_acquire_interval,
                lease_store,
                observer,
                owned: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
            }),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Load the lease table without changing anything. Transient storage
    /// failures are retried; anything else fails the start.
    pub async fn initialize(&self) -> Result<(), PartitionError> {
        let leases = with_retries(&RetryPolicy::default(), "list_leases", || {
            self.shared.lease_store.list_leases()
        })
        .await?;
        info!(
            worker_id = %self.shared.worker_id,
            partitions = leases.len(),
            "partition manager initialized"
        );
        Ok(())
    }

    /// Launch the acquire and renew loops.
    pub async fn start(&self) -> Result<(), PartitionError> {
        let mut loops = self.loops.lock().await;
        if !loops.is_empty() {
            return Err(PartitionError::AlreadyStarted);
        }
        let acquire = {
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.acquire_loop().await })
        };
        let renew = {
            let shared = self.shared.clone();
            tokio::spawn(async move { shared.renew_loop().await })
        };
        loops.push(acquire);
        loops.push(renew);
        Ok(())
    }

    /// Cancel both loops, then release every owned lease in parallel
    /// (best-effort) and await the observer notifications.
    pub async fn stop(&self) {
        self.shared.shutdown.cancel();
        let loops: Vec<JoinHandle<()>> = std::mem::take(&mut *self.loops.lock().await);
        for handle in loops {
            let _ = handle.await;
        }

        let shared = &self.shared;
        let owned: Vec<Lease> = shared.owned.lock().await.drain().map(|(_, l)| l).collect();
        let releases = owned.into_iter().map(|lease| async move {
            match shared.lease_store.release(&lease).await {
                Ok(ReleaseOutcome::Released) => {
                    debug!(partition_id = %lease.partition_id, "lease released")
                }
                Ok(ReleaseOutcome::Lost) => {
                    debug!(partition_id = %lease.partition_id, "lease already lost at shutdown")
                }
                Err(e) => {
                    warn!(partition_id = %lease.partition_id, error = %e, "lease release failed")
                }
            }
            shared
                .observer
                .lease_released(&lease, ReleaseReason::Shutdown)
                .await;
        });
        join_all(releases).await;
        info!(worker_id = %self.shared.worker_id, "partition manager stopped");
    }

    pub async fn owned_partitions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.shared.owned.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn owns_partition(&self, partition_id: &str) -> bool {
        self.shared.owned.lock().await.contains_key(partition_id)
    }
}

impl Shared {
    // ── Acquire loop ─────────────────────────────────────────────────────────

    async fn acquire_loop(self: Arc<Self>) {
        loop {
            if let Err(e) = self.scan().await {
                warn!(worker_id = %self.worker_id, error = %e, "lease scan failed");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.acquire_interval) => {}
            }
        }
    }

    async fn scan(&self) -> Result<(), PartitionError> {
        let leases = self.lease_store.list_leases().await?;
        let total = leases.len();
        if total == 0 {
            return Ok(());
        }

        // Active workers are inferred from current unexpired leaseholders;
        // count ourselves even while holding nothing.
        let mut per_owner: HashMap<WorkerId, usize> = HashMap::new();
        for lease in leases.iter().filter(|l| l.is_owned()) {
            if let Some(owner) = &lease.owner {
                *per_owner.entry(owner.clone()).or_default() += 1;
            }
        }
        let mut active_workers = per_owner.len();
        if !per_owner.contains_key(&self.worker_id) {
            active_workers += 1;
        }
        let target = total.div_ceil(active_workers);
        let mut my_count = per_owner.get(&self.worker_id).copied().unwrap_or(0);
        debug!(
            worker_id = %self.worker_id,
            total, active_workers, target, my_count,
            "lease scan"
        );

        // 1. Free leases first: unowned or expired.
        for lease in leases.iter().filter(|l| !l.is_owned()) {
            if my_count >= target {
                break;
            }
            match self
                .lease_store
                .acquire(&lease.partition_id, &self.worker_id, self.lease_interval)
                .await?
            {
                AcquireOutcome::Acquired(acquired) => {
                    info!(
                        worker_id = %self.worker_id,
                        partition_id = %acquired.partition_id,
                        epoch = acquired.epoch,
                        "lease acquired"
                    );
                    self.adopt(acquired).await;
                    my_count += 1;
                }
                AcquireOutcome::AlreadyOwned => {
                    debug!(partition_id = %lease.partition_id, "lost acquire race");
                }
            }
        }

        // 2. Still short: steal at most one lease per scan from the
        // most-loaded peer.
        if my_count < target {
            let most_loaded = per_owner
                .iter()
                .filter(|(owner, _)| **owner != self.worker_id)
                .max_by_key(|(_, count)| **count);
            if let Some((victim, victim_count)) = most_loaded {
                if *victim_count > my_count {
                    if let Some(lease) = leases
                        .iter()
                        .find(|l| l.is_owned() && l.owner.as_ref() == Some(victim))
                    {
                        match self
                            .lease_store
                            .steal(lease, &self.worker_id, self.lease_interval)
                            .await?
                        {
                            AcquireOutcome::Acquired(stolen) => {
                                info!(
                                    worker_id = %self.worker_id,
                                    partition_id = %stolen.partition_id,
                                    from = %victim,
                                    epoch = stolen.epoch,
                                    "lease stolen"
                                );
                                self.adopt(stolen).await;
                            }
                            AcquireOutcome::AlreadyOwned => {
                                debug!(partition_id = %lease.partition_id, "lost steal race");
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn adopt(&self, lease: Lease) {
        // Ordered: the observer sees the acquisition before any dispatch
        // from this partition can begin.
        self.observer.lease_acquired(&lease).await;
        self.owned
            .lock()
            .await
            .insert(lease.partition_id.clone(), lease);
    }

    // ── Renew loop ───────────────────────────────────────────────────────────

    async fn renew_loop(self: Arc<Self>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.renew_interval) => {}
            }
            self.renew_all().await;
        }
    }

    async fn renew_all(&self) {
        let held: Vec<Lease> = self.owned.lock().await.values().cloned().collect();
        for lease in held {
            match self.lease_store.renew(&lease, self.lease_interval).await {
                Ok(RenewOutcome::Renewed(renewed)) => {
                    self.owned
                        .lock()
                        .await
                        .insert(renewed.partition_id.clone(), renewed);
                }
                Ok(RenewOutcome::Lost) => {
                    warn!(
                        worker_id = %self.worker_id,
                        partition_id = %lease.partition_id,
                        "lease lost"
                    );
                    self.owned.lock().await.remove(&lease.partition_id);
                    self.observer
                        .lease_released(&lease, ReleaseReason::LeaseLost)
                        .await;
                }
                Err(e) => {
                    // Keep the lease; the next tick (or expiry) settles it.
                    warn!(
                        partition_id = %lease.partition_id,
                        error = %e,
                        "lease renew failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use taskhub_store::InMemoryLeaseStore;

    #[derive(Default)]
    struct RecordingObserver {
        acquired: Mutex<Vec<String>>,
        released: Mutex<Vec<(String, ReleaseReason)>>,
    }

    #[async_trait]
    impl PartitionObserver for RecordingObserver {
        async fn lease_acquired(&self, lease: &Lease) {
            self.acquired.lock().await.push(lease.partition_id.clone());
        }

        async fn lease_released(&self, lease: &Lease, reason: ReleaseReason) {
            self.released
                .lock()
                .await
                .push((lease.partition_id.clone(), reason));
        }
    }

    fn fast_settings(worker: &str) -> TaskHubSettings {
        TaskHubSettings {
            worker_id: WorkerId::new(worker),
            lease_acquire_interval: Duration::from_millis(10),
            lease_renew_interval: Duration::from_millis(10),
            lease_interval: Duration::from_secs(30),
            ..Default::default()
        }
    }

    async fn store_with_partitions(count: u32) -> Arc<InMemoryLeaseStore> {
        let store = Arc::new(InMemoryLeaseStore::new());
        for i in 0..count {
            store
                .create_lease_if_not_exists(&format!("hub-control-{:02}", i))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test(start_paused = true)]
    async fn single_worker_acquires_everything() {
        let store = store_with_partitions(4).await;
        let observer = Arc::new(RecordingObserver::default());
        let manager = PartitionManager::new(&fast_settings("a"), store.clone(), observer.clone());
        manager.initialize().await.unwrap();
        manager.start().await.unwrap();

        for _ in 0..100 {
            if manager.owned_partitions().await.len() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.owned_partitions().await.len(), 4);
        assert_eq!(observer.acquired.lock().await.len(), 4);

        manager.stop().await;
        assert!(manager.owned_partitions().await.is_empty());
        let released = observer.released.lock().await;
        assert_eq!(released.len(), 4);
        assert!(released.iter().all(|(_, r)| *r == ReleaseReason::Shutdown));

        // Everything is free again.
        let leases = store.list_leases().await.unwrap();
        assert!(leases.iter().all(|l| !l.is_owned()));
    }

    #[tokio::test(start_paused = true)]
    async fn second_worker_steals_to_balance() {
        let store = store_with_partitions(16).await;

        let observer_a = Arc::new(RecordingObserver::default());
        let a = PartitionManager::new(&fast_settings("a"), store.clone(), observer_a.clone());
        a.start().await.unwrap();
        for _ in 0..200 {
            if a.owned_partitions().await.len() == 16 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.owned_partitions().await.len(), 16);

        let observer_b = Arc::new(RecordingObserver::default());
        let b = PartitionManager::new(&fast_settings("b"), store.clone(), observer_b.clone());
        b.start().await.unwrap();

        for _ in 0..2000 {
            if a.owned_partitions().await.len() == 8 && b.owned_partitions().await.len() == 8 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(a.owned_partitions().await.len(), 8);
        assert_eq!(b.owned_partitions().await.len(), 8);

        // The loser learned about every stolen partition.
        let lost = observer_a.released.lock().await;
        assert_eq!(lost.len(), 8);
        assert!(lost.iter().all(|(_, r)| *r == ReleaseReason::LeaseLost));
        drop(lost);

        a.stop().await;
        b.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn externally_stolen_lease_surfaces_as_lost() {
        let store = store_with_partitions(1).await;
        let observer = Arc::new(RecordingObserver::default());
        let manager = PartitionManager::new(&fast_settings("a"), store.clone(), observer.clone());
        manager.start().await.unwrap();

        for _ in 0..100 {
            if manager.owns_partition("hub-control-00").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.owns_partition("hub-control-00").await);

        // Another worker takes the lease behind our back.
        let current = store.list_leases().await.unwrap().remove(0);
        let AcquireOutcome::Acquired(_) = store
            .steal(&current, &WorkerId::new("thief"), Duration::from_secs(30))
            .await
            .unwrap()
        else {
            panic!("steal failed");
        };

        for _ in 0..100 {
            if !manager.owns_partition("hub-control-00").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!manager.owns_partition("hub-control-00").await);
        {
            let released = observer.released.lock().await;
            assert_eq!(released.len(), 1);
            assert_eq!(released[0].1, ReleaseReason::LeaseLost);
        }

        manager.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let store = store_with_partitions(1).await;
        let manager = PartitionManager::new(
            &fast_settings("a"),
            store,
            Arc::new(RecordingObserver::default()),
        );
        manager.start().await.unwrap();
        assert!(matches!(
            manager.start().await,
            Err(PartitionError::AlreadyStarted)
        ));
        manager.stop().await;
    }
}
