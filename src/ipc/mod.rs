//! Inter-process plumbing: shared segments, named semaphores, the request ring and result FIFOs.

pub mod fifo;
pub mod queue;
pub mod semaphore;
pub mod shm;

pub use fifo::{ResultChannel, ResultWriter};
pub use queue::{RequestQueue, RequestSlot, queue_capacity};
pub use semaphore::NamedSemaphore;
pub use shm::SharedSegment;
