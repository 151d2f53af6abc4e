use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use taskhub_domain::{TaskHubInfo, WorkerId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;
use crate::lease_store::{AcquireOutcome, Lease, LeaseStore, ReleaseOutcome, RenewOutcome};

#[derive(Debug, Default)]
struct Inner {
    hub_info: Option<TaskHubInfo>,
    leases: HashMap<String, Lease>,
}

/// In-memory [`LeaseStore`] with token fencing and monotonic epochs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn expiry(lease_interval: Duration) -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(lease_interval).unwrap_or_else(|_| chrono::Duration::zero())
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn create_lease_store_if_not_exists(&self, hub: &TaskHubInfo) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        if guard.hub_info.is_none() {
            guard.hub_info = Some(hub.clone());
        }
        Ok(())
    }

    async fn get_or_create_task_hub_info(
        &self,
        default: TaskHubInfo,
    ) -> Result<TaskHubInfo, StoreError> {
        let mut guard = self.inner.write().await;
        match &guard.hub_info {
            Some(existing) => Ok(existing.clone()),
            None => {
                guard.hub_info = Some(default.clone());
                Ok(default)
            }
        }
    }

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard
            .leases
            .entry(partition_id.to_string())
            .or_insert_with(|| Lease {
                partition_id: partition_id.to_string(),
                owner: None,
                token: String::new(),
                expires_at: Utc::now(),
                epoch: 0,
            });
        Ok(())
    }

    async fn acquire(
        &self,
        partition_id: &str,
        worker: &WorkerId,
        lease_interval: Duration,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let lease = guard
            .leases
            .get_mut(partition_id)
            .ok_or_else(|| StoreError::NotFound(format!("lease {partition_id}")))?;
        if lease.is_owned() {
            return Ok(AcquireOutcome::AlreadyOwned);
        }
        lease.owner = Some(worker.clone());
        lease.token = Uuid::new_v4().to_string();
        lease.expires_at = expiry(lease_interval);
        lease.epoch += 1;
        Ok(AcquireOutcome::Acquired(lease.clone()))
    }

    async fn steal(
        &self,
        observed: &Lease,
        new_owner: &WorkerId,
        lease_interval: Duration,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let lease = guard
            .leases
            .get_mut(&observed.partition_id)
            .ok_or_else(|| StoreError::NotFound(format!("lease {}", observed.partition_id)))?;
        // The holder moved on since the scan; give up rather than fight.
        if lease.token != observed.token {
            return Ok(AcquireOutcome::AlreadyOwned);
        }
        lease.owner = Some(new_owner.clone());
        lease.token = Uuid::new_v4().to_string();
        lease.expires_at = expiry(lease_interval);
        lease.epoch += 1;
        Ok(AcquireOutcome::Acquired(lease.clone()))
    }

    async fn renew(
        &self,
        held: &Lease,
        lease_interval: Duration,
    ) -> Result<RenewOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let lease = guard
            .leases
            .get_mut(&held.partition_id)
            .ok_or_else(|| StoreError::NotFound(format!("lease {}", held.partition_id)))?;
        if lease.token != held.token {
            return Ok(RenewOutcome::Lost);
        }
        lease.expires_at = expiry(lease_interval);
        Ok(RenewOutcome::Renewed(lease.clone()))
    }

    async fn release(&self, held: &Lease) -> Result<ReleaseOutcome, StoreError> {
        let mut guard = self.inner.write().await;
        let lease = guard
            .leases
            .get_mut(&held.partition_id)
            .ok_or_else(|| StoreError::NotFound(format!("lease {}", held.partition_id)))?;
        if lease.token != held.token {
            return Ok(ReleaseOutcome::Lost);
        }
        lease.owner = None;
        lease.token = String::new();
        lease.expires_at = Utc::now();
        Ok(ReleaseOutcome::Released)
    }

    async fn list_leases(&self) -> Result<Vec<Lease>, StoreError> {
        let guard = self.inner.read().await;
        let mut leases: Vec<Lease> = guard.leases.values().cloned().collect();
        leases.sort_by(|a, b| a.partition_id.cmp(&b.partition_id));
        Ok(leases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_partition(partition: &str) -> InMemoryLeaseStore {
        let store = InMemoryLeaseStore::new();
        store.create_lease_if_not_exists(partition).await.unwrap();
        store
    }

    #[tokio::test]
    async fn hub_info_read_wins_over_create() {
        let store = InMemoryLeaseStore::new();
        let first = TaskHubInfo::new("hub", 4).unwrap();
        store.create_lease_store_if_not_exists(&first).await.unwrap();

        let competing = TaskHubInfo::new("hub", 8).unwrap();
        let resolved = store.get_or_create_task_hub_info(competing).await.unwrap();
        assert_eq!(resolved.partition_count, 4);
    }

    #[tokio::test]
    async fn acquire_then_conflict() {
        let store = store_with_partition("hub-control-00").await;
        let a = WorkerId::new("worker-a");
        let b = WorkerId::new("worker-b");
        let interval = Duration::from_secs(30);

        let outcome = store.acquire("hub-control-00", &a, interval).await.unwrap();
        let lease = match outcome {
            AcquireOutcome::Acquired(l) => l,
            AcquireOutcome::AlreadyOwned => panic!("expected acquisition"),
        };
        assert_eq!(lease.epoch, 1);
        assert_eq!(lease.owner.as_ref().unwrap().as_str(), "worker-a");

        assert!(matches!(
            store.acquire("hub-control-00", &b, interval).await.unwrap(),
            AcquireOutcome::AlreadyOwned
        ));
    }

    #[tokio::test]
    async fn expired_lease_is_acquirable_and_old_holder_loses() {
        let store = store_with_partition("p").await;
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");

        let AcquireOutcome::Acquired(held_by_a) = store
            .acquire("p", &a, Duration::from_millis(0))
            .await
            .unwrap()
        else {
            panic!("expected acquisition");
        };

        let AcquireOutcome::Acquired(held_by_b) = store
            .acquire("p", &b, Duration::from_secs(30))
            .await
            .unwrap()
        else {
            panic!("expected takeover of expired lease");
        };
        assert_eq!(held_by_b.epoch, held_by_a.epoch + 1);

        assert!(matches!(
            store.renew(&held_by_a, Duration::from_secs(30)).await.unwrap(),
            RenewOutcome::Lost
        ));
        assert!(matches!(
            store.release(&held_by_a).await.unwrap(),
            ReleaseOutcome::Lost
        ));
    }

    #[tokio::test]
    async fn steal_transfers_ownership_and_bumps_epoch() {
        let store = store_with_partition("p").await;
        let a = WorkerId::new("a");
        let b = WorkerId::new("b");
        let interval = Duration::from_secs(30);

        let AcquireOutcome::Acquired(held_by_a) = store.acquire("p", &a, interval).await.unwrap()
        else {
            panic!("expected acquisition");
        };

        let AcquireOutcome::Acquired(stolen) =
            store.steal(&held_by_a, &b, interval).await.unwrap()
        else {
            panic!("expected steal");
        };
        assert_eq!(stolen.owner.as_ref().unwrap().as_str(), "b");
        assert_eq!(stolen.epoch, held_by_a.epoch + 1);

        // The loser's next renew comes back Lost.
        assert!(matches!(
            store.renew(&held_by_a, interval).await.unwrap(),
            RenewOutcome::Lost
        ));

        // A second steal with the stale observation loses the race.
        assert!(matches!(
            store.steal(&held_by_a, &a, interval).await.unwrap(),
            AcquireOutcome::AlreadyOwned
        ));
    }

    #[tokio::test]
    async fn release_frees_the_partition() {
        let store = store_with_partition("p").await;
        let a = WorkerId::new("a");
        let interval = Duration::from_secs(30);

        let AcquireOutcome::Acquired(lease) = store.acquire("p", &a, interval).await.unwrap()
        else {
            panic!("expected acquisition");
        };
        assert!(matches!(
            store.release(&lease).await.unwrap(),
            ReleaseOutcome::Released
        ));
        assert!(matches!(
            store.acquire("p", &a, interval).await.unwrap(),
            AcquireOutcome::Acquired(_)
        ));
    }
}
