use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskhub_domain::{TaskHubInfo, WorkerId};

use crate::error::StoreError;

// ── Lease ─────────────────────────────────────────────────────────────────────

/// An expiring claim of exclusive partition ownership.
///
/// `token` is the fencing credential: renew, release and steal all compare it
/// against the stored value, so a worker whose lease was taken over loses the
/// race instead of clobbering the new owner. `epoch` increments on every
/// ownership change and never goes backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub partition_id: String,
    pub owner: Option<WorkerId>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub epoch: u64,
}

impl Lease {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    pub fn is_owned(&self) -> bool {
        self.owner.is_some() && !self.is_expired()
    }
}

// ── Operation outcomes ────────────────────────────────────────────────────────

/// Lost races are ordinary values, not errors; only storage failures escalate.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(Lease),
    /// Another worker holds an unexpired lease.
    AlreadyOwned,
}

#[derive(Debug, Clone)]
pub enum RenewOutcome {
    Renewed(Lease),
    /// The stored token no longer matches: the lease expired and was taken,
    /// or was stolen outright.
    Lost,
}

#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Released,
    Lost,
}

// ── LeaseStore ────────────────────────────────────────────────────────────────

/// Persists lease ownership of each partition and the task hub sentinel.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// Idempotent; writes the hub sentinel iff absent.
    async fn create_lease_store_if_not_exists(&self, hub: &TaskHubInfo) -> Result<(), StoreError>;

    /// Read-through create: a lost creation race returns the stored record.
    async fn get_or_create_task_hub_info(
        &self,
        default: TaskHubInfo,
    ) -> Result<TaskHubInfo, StoreError>;

    async fn create_lease_if_not_exists(&self, partition_id: &str) -> Result<(), StoreError>;

    /// Take ownership of an unowned or expired lease.
    async fn acquire(
        &self,
        partition_id: &str,
        worker: &WorkerId,
        lease_interval: Duration,
    ) -> Result<AcquireOutcome, StoreError>;

    /// Take over an unexpired lease from its current holder. The presented
    /// `lease` must carry the holder's current token; the loser finds out at
    /// its next renew.
    async fn steal(
        &self,
        lease: &Lease,
        new_owner: &WorkerId,
        lease_interval: Duration,
    ) -> Result<AcquireOutcome, StoreError>;

    async fn renew(
        &self,
        lease: &Lease,
        lease_interval: Duration,
    ) -> Result<RenewOutcome, StoreError>;

    async fn release(&self, lease: &Lease) -> Result<ReleaseOutcome, StoreError>;

    async fn list_leases(&self) -> Result<Vec<Lease>, StoreError>;
}
