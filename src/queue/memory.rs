use super::JobQueue;
use crate::error::QueueError;
use crate::job::{Job, JobId, Priority};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct Lanes {
    /// Checked before `main`; front is served first
    priority: VecDeque<Job>,
    main: VecDeque<Job>,
    closed: bool,
}

impl Lanes {
    fn pop(&mut self) -> Option<Job> {
        self.priority.pop_front().or_else(|| self.main.pop_front())
    }

    fn len(&self) -> usize {
        self.priority.len() + self.main.len()
    }
}

/// In-process queue with an explicit priority lane.
///
/// `High` requeues go to the front of the priority lane, so among several of them the
/// most recent is served first.
#[derive(Default)]
pub struct MemoryJobQueue {
    lanes: Mutex<Lanes>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the queue unavailable. Later enqueue, requeue and dequeue calls fail with
    /// [`QueueError::Unavailable`]; jobs already queued stay put.
    pub fn close(&self) {
        self.lanes.lock().closed = true;
        self.notify.notify_waiters();
    }

    /// Ids of waiting jobs in the order they would be dequeued.
    pub fn pending_ids(&self) -> Vec<JobId> {
        let lanes = self.lanes.lock();
        lanes.priority.iter().chain(lanes.main.iter()).map(|j| j.id).collect()
    }

    fn push(&self, job: Job, priority: Priority) -> Result<(), QueueError> {
        {
            let mut lanes = self.lanes.lock();
            if lanes.closed {
                return Err(QueueError::Unavailable("memory queue is closed".into()));
            }
            match priority {
                Priority::High => lanes.priority.push_front(job),
                Priority::Normal => lanes.main.push_back(job),
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Result<Option<Job>, QueueError> {
        let mut lanes = self.lanes.lock();
        if lanes.closed {
            return Err(QueueError::Unavailable("memory queue is closed".into()));
        }
        Ok(lanes.pop())
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<JobId, QueueError> {
        let id = job.id;
        self.push(job, Priority::Normal)?;
        Ok(id)
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Job>, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            // Register interest before checking so a push in between is not missed
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(job) = self.try_pop()? {
                return Ok(Some(job));
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn requeue(&self, job: Job, priority: Priority) -> Result<(), QueueError> {
        self.push(job, priority)
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let lanes = self.lanes.lock();
        if lanes.closed {
            return Err(QueueError::Unavailable("memory queue is closed".into()));
        }
        Ok(lanes.len())
    }

    async fn remove(&self, job_id: JobId) -> Result<bool, QueueError> {
        let mut lanes = self.lanes.lock();
        let before = lanes.len();
        lanes.priority.retain(|j| j.id != job_id);
        lanes.main.retain(|j| j.id != job_id);
        Ok(lanes.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn job(target: &str) -> Job {
        Job::new(target, "room", "text", "auto", &["pl"]).unwrap()
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryJobQueue::new();
        for t in ["a", "b", "c"] {
            queue.enqueue(job(t)).await.unwrap();
        }

        for expected in ["a", "b", "c"] {
            let got = queue.dequeue(SHORT).await.unwrap().unwrap();
            assert_eq!(got.target_ref, expected);
        }
        assert!(queue.dequeue(SHORT).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_high_requeue_jumps_the_line() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("a")).await.unwrap();
        queue.requeue(job("b"), Priority::High).await.unwrap();
        queue.enqueue(job("c")).await.unwrap();

        let mut order = Vec::new();
        while let Some(next) = queue.dequeue(SHORT).await.unwrap() {
            order.push(next.target_ref);
        }
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_normal_requeue_goes_to_back() {
        let queue = MemoryJobQueue::new();
        queue.enqueue(job("a")).await.unwrap();
        queue.requeue(job("b"), Priority::Normal).await.unwrap();

        assert_eq!(queue.dequeue(SHORT).await.unwrap().unwrap().target_ref, "a");
        assert_eq!(queue.dequeue(SHORT).await.unwrap().unwrap().target_ref, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_dequeue_times_out_when_empty() {
        let queue = MemoryJobQueue::new();
        let start = Instant::now();

        assert!(queue.dequeue(Duration::from_secs(1)).await.unwrap().is_none());
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(MemoryJobQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(job("late")).await.unwrap();

        let got = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(got.target_ref, "late");
    }

    #[tokio::test]
    async fn test_concurrent_consumers_never_share_a_job() {
        let queue = MemoryJobQueue::new();
        for i in 0..20 {
            queue.enqueue(job(&format!("m{}", i))).await.unwrap();
        }

        let consumers = (0..4).map(|_| async {
            let mut taken = Vec::new();
            while let Some(job) = queue.dequeue(SHORT).await.unwrap() {
                taken.push(job.id);
            }
            taken
        });
        let mut all: Vec<JobId> = futures::future::join_all(consumers)
            .await
            .into_iter()
            .flatten()
            .collect();

        assert_eq!(all.len(), 20);
        all.sort_by_key(|id| id.to_string());
        all.dedup();
        assert_eq!(all.len(), 20);
    }

    #[tokio::test]
    async fn test_remove_before_dequeue() {
        let queue = MemoryJobQueue::new();
        let keep = job("keep");
        let cancelled = job("cancelled");
        let cancelled_id = cancelled.id;
        queue.enqueue(keep).await.unwrap();
        queue.enqueue(cancelled).await.unwrap();

        assert!(queue.remove(cancelled_id).await.unwrap());
        assert!(!queue.remove(cancelled_id).await.unwrap());
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_is_unavailable() {
        let queue = MemoryJobQueue::new();
        queue.close();

        assert!(matches!(
            queue.enqueue(job("a")).await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(matches!(
            queue.requeue(job("a"), Priority::High).await,
            Err(QueueError::Unavailable(_))
        ));
        assert!(matches!(
            queue.dequeue(SHORT).await,
            Err(QueueError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_pending_ids_reflect_dequeue_order() {
        let queue = MemoryJobQueue::new();
        let a = job("a");
        let b = job("b");
        let (a_id, b_id) = (a.id, b.id);
        queue.enqueue(a).await.unwrap();
        queue.requeue(b, Priority::High).await.unwrap();

        assert_eq!(queue.pending_ids(), vec![b_id, a_id]);
    }
}
