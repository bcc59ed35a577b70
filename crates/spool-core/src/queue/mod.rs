//! Queue module: fetch engine, claimed-job handle and in-process wake-up signal.

mod fetched;
mod job_queue;
mod semaphore;

pub use fetched::FetchedJob;
pub use job_queue::JobQueue;
pub use semaphore::JobQueueSemaphore;
