use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic, eventually-consistent counters for one service instance.
#[derive(Debug, Default)]
pub struct ServiceStats {
    pub messages_read: AtomicU64,
    pub messages_sent: AtomicU64,
    pub sessions_leased: AtomicU64,
    pub sessions_released: AtomicU64,
    pub checkpoints_committed: AtomicU64,
    pub checkpoint_conflicts: AtomicU64,
    pub activities_completed: AtomicU64,
    pub work_items_discarded: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_read: u64,
    pub messages_sent: u64,
    pub sessions_leased: u64,
    pub sessions_released: u64,
    pub checkpoints_committed: u64,
    pub checkpoint_conflicts: u64,
    pub activities_completed: u64,
    pub work_items_discarded: u64,
}

impl ServiceStats {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_read: self.messages_read.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            sessions_leased: self.sessions_leased.load(Ordering::Relaxed),
            sessions_released: self.sessions_released.load(Ordering::Relaxed),
            checkpoints_committed: self.checkpoints_committed.load(Ordering::Relaxed),
            checkpoint_conflicts: self.checkpoint_conflicts.load(Ordering::Relaxed),
            activities_completed: self.activities_completed.load(Ordering::Relaxed),
            work_items_discarded: self.work_items_discarded.load(Ordering::Relaxed),
        }
    }
}
