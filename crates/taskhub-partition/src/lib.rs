pub mod error;
pub mod manager;
pub mod observer;

pub use error::PartitionError;
pub use manager::PartitionManager;
pub use observer::{PartitionObserver, ReleaseReason};
