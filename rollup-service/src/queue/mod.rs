mod delivery;
mod task;

pub use delivery::{DeliveryQueue, DeliveryWorkers, QUEUE_NAME_HEADER};
pub use task::{RecordingQueue, Task, TaskQueue};
