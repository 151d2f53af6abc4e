use async_trait::async_trait;
use taskhub_store::Lease;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The worker gave the lease up during an orderly stop.
    Shutdown,
    /// Renewal failed: the lease expired and was taken, or was stolen.
    LeaseLost,
}

impl std::fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleaseReason::Shutdown => write!(f, "shutdown"),
            ReleaseReason::LeaseLost => write!(f, "lease_lost"),
        }
    }
}

/// Sink for partition ownership changes.
///
/// `lease_acquired` completes before any message from the partition is
/// dispatched; `lease_released` completes before the partition's control
/// queue is dropped. Implementations must not block: either act quickly or
/// hand the work to an internal queue.
#[async_trait]
pub trait PartitionObserver: Send + Sync + 'static {
    async fn lease_acquired(&self, lease: &Lease);

    async fn lease_released(&self, lease: &Lease, reason: ReleaseReason);
}
