pub mod codec;
pub mod control_queue;
pub mod error;
pub mod message;
pub mod work_item_queue;

pub use codec::{LargeMessageCodec, DEFAULT_INLINE_THRESHOLD_BYTES};
pub use control_queue::ControlQueue;
pub use error::QueueError;
pub use message::MessageData;
pub use work_item_queue::WorkItemQueue;
