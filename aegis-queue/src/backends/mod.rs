mod file;
mod memory;

pub use file::{FileQueue, FileQueueBuilder};
pub use memory::MemoryQueue;
