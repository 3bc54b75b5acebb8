//! Job queue module

pub mod job_queue;

pub use job_queue::{JobQueue, QueueStats, DEFAULT_CAPACITY};
