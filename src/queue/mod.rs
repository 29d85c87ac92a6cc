//! Ordered work queue for translation jobs.
//!
//! Strict FIFO absent requeues. A `High` requeue puts the job ahead of every waiting
//! `Normal` job; a `Normal` requeue sends it to the back of the line.
//!
//! - `memory`: in-process two-lane queue (single dispatcher, tests)
//! - `redis`: Redis list shared by every dispatcher replica

pub mod memory;
pub mod redis;

pub use self::memory::MemoryJobQueue;
pub use self::redis::RedisJobQueue;

use crate::error::QueueError;
use crate::job::{Job, JobId, Priority};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job at the back of the line.
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError>;

    /// Next eligible job, or `None` once `timeout` elapses with nothing to do.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError>;

    /// Hand a job back to the queue.
    async fn requeue(&self, job: Job, priority: Priority) -> Result<(), QueueError>;

    /// Approximate backlog.
    async fn len(&self) -> Result<usize, QueueError>;

    /// Best-effort removal of a job that has not been dequeued yet.
    async fn remove(&self, job_id: JobId) -> Result<bool, QueueError>;
}
