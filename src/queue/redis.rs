//! Redis-backed job queue shared by every dispatcher replica.
//!
//! One list per queue name. Jobs are pushed on the left (`LPUSH`) and popped from the
//! right (`BRPOP`), which gives FIFO order. A `High` requeue pushes on the right
//! (`RPUSH`) so it is the very next job any replica pops.
//!
//! Delivery is at-most-once: a job popped by a replica that then crashes is lost.

use super::JobQueue;
use crate::error::QueueError;
use crate::job::{Job, JobId, Priority};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct RedisJobQueue {
    /// Redis connection manager (handles reconnection automatically)
    redis: ConnectionManager,
    queue_name: String,
}

impl RedisJobQueue {
    /// Connect to Redis and use the list named `queue_name`.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| QueueError::Unavailable(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Unavailable(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Build from an existing connection, e.g. one shared with the cache.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// BRPOP takes whole seconds; 0 would block forever.
fn brpop_timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}

/// Whether a serialized list entry belongs to `job_id`.
fn entry_matches(raw: &str, job_id: JobId) -> bool {
    match Job::from_json(raw) {
        Ok(job) => job.id == job_id,
        Err(_) => false,
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        let serialized = job.to_json()?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let mut conn = self.redis.clone();

        let result: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_name)
            .arg(brpop_timeout_secs(timeout))
            .query_async(&mut conn)
            .await?;

        match result {
            Some((_list, data)) => match Job::from_json(&data) {
                Ok(job) => Ok(Some(job)),
                Err(e) => {
                    // Already popped; the entry cannot be put back meaningfully
                    warn!("Dropping undecodable job payload from {}: {}", self.queue_name, e);
                    Err(QueueError::Serialization(e))
                }
            },
            None => Ok(None),
        }
    }

    async fn requeue(&self, job: Job, priority: Priority) -> Result<(), QueueError> {
        let serialized = job.to_json()?;
        let mut conn = self.redis.clone();
        match priority {
            Priority::High => conn.rpush::<_, _, ()>(&self.queue_name, serialized).await?,
            Priority::Normal => conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?,
        }
        debug!("Requeued job {} ({:?})", job.id, priority);
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    async fn remove(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.queue_name, 0, -1).await?;

        for entry in entries {
            if entry_matches(&entry, job_id) {
                let removed: usize = conn.lrem(&self.queue_name, 1, &entry).await?;
                return Ok(removed > 0);
            }
        }

        Ok(false)
    }
}
