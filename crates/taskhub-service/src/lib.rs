pub mod checkpoint;
pub mod client;
pub mod error;
pub mod hub;
pub mod service;
pub mod stats;
pub mod work_item;

pub use error::ServiceError;
pub use service::OrchestrationService;
pub use stats::{ServiceStats, StatsSnapshot};
pub use work_item::{TaskActivityWorkItem, TaskOrchestrationWorkItem};
