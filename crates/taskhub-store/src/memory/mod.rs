//! In-memory implementations of the four storage seams. All data is lost on
//! process exit; semantics (visibility timeouts, receipt invalidation, ETags,
//! lease epochs) match what the real backends provide, so the full stack can
//! be exercised in tests.

mod blob;
mod history;
mod lease;
mod queue;

pub use blob::InMemoryBlobStore;
pub use history::InMemoryHistoryStore;
pub use lease::InMemoryLeaseStore;
pub use queue::InMemoryQueue;
