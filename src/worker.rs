//! Worker pool: pulls jobs off the queue and drives each one to an outcome.
//!
//! Concurrency is bounded by a semaphore; every processing routine is tracked in a
//! `JoinSet` so shutdown can wait for it (up to the grace period) and report what
//! was abandoned.
//!
//! Per-job flow:
//! 1. Mark the message `InProgress`
//! 2. Translate under the per-job timeout
//! 3. Success: mark `Completed`, broadcast `translation.completed`
//! 4. Failure: classify; retry with linear backoff while the budget lasts, otherwise
//!    mark `Failed` and broadcast `translation.failed` with the safe summary
//!
//! Shutdown while a job is running or backing off hands it back at `High` priority.

use crate::adapters::{MessageStore, NotificationChannel, StatusUpdate, EVENT_COMPLETED, EVENT_FAILED};
use crate::classifier::{classify, Failure};
use crate::config::Config;
use crate::error::TranslationError;
use crate::job::{Job, JobId, Priority, TranslationState};
use crate::metrics::PipelineMetrics;
use crate::provider::{TranslateRequest, TranslateResponse, TranslationProvider};
use crate::queue::JobQueue;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_concurrent_jobs: usize,
    pub max_retries: u32,
    /// Base delay; the wait before retry `n` is `retry_delay * n`
    pub retry_delay: Duration,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_concurrent_jobs: config.max_concurrent_jobs,
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            job_timeout: config.job_timeout(),
            poll_interval: config.poll_interval(),
            shutdown_grace: config.shutdown_grace(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How a single processing routine ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Requeued at normal priority after a retryable failure
    Retrying,
    Failed,
    /// Handed back at high priority because of shutdown
    Interrupted,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Jobs still running when the grace period ran out
    pub lost: Vec<JobId>,
}

#[derive(Clone)]
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<dyn JobQueue>,
    provider: Arc<TranslationProvider>,
    store: Arc<dyn MessageStore>,
    notifier: Arc<dyn NotificationChannel>,
    metrics: Arc<PipelineMetrics>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

/// Removes a job id from the in-flight set when its routine ends, however it ends.
struct InFlightJob {
    ids: Arc<Mutex<HashSet<JobId>>>,
    id: JobId,
}

impl InFlightJob {
    fn register(ids: &Arc<Mutex<HashSet<JobId>>>, id: JobId) -> Self {
        ids.lock().insert(id);
        Self {
            ids: ids.clone(),
            id,
        }
    }
}

impl Drop for InFlightJob {
    fn drop(&mut self) {
        self.ids.lock().remove(&self.id);
    }
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn JobQueue>,
        provider: Arc<TranslationProvider>,
        store: Arc<dyn MessageStore>,
        notifier: Arc<dyn NotificationChannel>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            queue,
            provider,
            store,
            notifier,
            metrics,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Run the dispatch loop until `shutdown` is cancelled, then drain.
    pub async fn run(&self, shutdown: CancellationToken) -> ShutdownReport {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let mut tasks: JoinSet<()> = JoinSet::new();

        info!(
            "Worker pool started (max {} concurrent jobs, {} retries)",
            self.config.max_concurrent_jobs, self.config.max_retries
        );

        loop {
            while let Some(result) = tasks.try_join_next() {
                log_join_result(result);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            if shutdown.is_cancelled() {
                break;
            }

            // Not raced against shutdown: a job popped from the queue must never be dropped
            match self.queue.dequeue(self.config.poll_interval).await {
                Ok(Some(mut job)) => {
                    if shutdown.is_cancelled() {
                        info!("Job {} dequeued during shutdown, handing it back", job.id);
                        job.priority = Priority::High;
                        if let Err(e) = self.queue.requeue(job.clone(), Priority::High).await {
                            error!("Failed to requeue job {}: {}", job.id, e);
                            // Failed is only reachable through InProgress
                            self.mark(StatusUpdate::new(&job.target_ref, job.id, TranslationState::InProgress))
                                .await;
                            self.fail(&job, &Failure::queue_unavailable()).await;
                        }
                        break;
                    }

                    debug!("Dequeued job {} for message {}", job.id, job.target_ref);
                    let pool = self.clone();
                    let token = shutdown.clone();
                    let tracker = InFlightJob::register(&self.in_flight, job.id);
                    tasks.spawn(async move {
                        let _permit = permit;
                        let _tracker = tracker;
                        pool.process(job, token).await;
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to dequeue translation job: {}", e);
                    drop(permit);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }

        self.drain(tasks).await
    }

    async fn drain(&self, mut tasks: JoinSet<()>) -> ShutdownReport {
        if !tasks.is_empty() {
            info!(
                "Shutting down, waiting up to {:?} for {} in-flight jobs",
                self.config.shutdown_grace,
                tasks.len()
            );
        }

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(result) = tasks.join_next().await {
                log_join_result(result);
            }
        })
        .await;

        let mut lost = Vec::new();
        if drained.is_err() {
            lost = self.in_flight.lock().iter().copied().collect();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            for id in &lost {
                error!("Job {} lost on shutdown", id);
            }
        }

        info!("Worker pool stopped");
        ShutdownReport { lost }
    }

    /// Drive one job to an outcome.
    pub async fn process(&self, job: Job, shutdown: CancellationToken) -> JobOutcome {
        let _in_flight = self.metrics.track_in_flight();

        debug!(
            "Processing job {} for message {} (attempt {})",
            job.id,
            job.target_ref,
            job.retry_count + 1
        );
        self.mark(StatusUpdate::new(&job.target_ref, job.id, TranslationState::InProgress))
            .await;

        let request = TranslateRequest::from_job(&job);
        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            result = tokio::time::timeout(self.config.job_timeout, self.provider.translate(&request)) => {
                Some(result.unwrap_or_else(|_| Err(TranslationError::Timeout)))
            }
        };

        match result {
            None => {
                info!("Job {} interrupted by shutdown, requeueing", job.id);
                if self.hand_back(job, Priority::High).await {
                    self.metrics.record_interrupted();
                    JobOutcome::Interrupted
                } else {
                    JobOutcome::Failed
                }
            }
            Some(Ok(response)) => {
                self.complete(&job, response).await;
                JobOutcome::Completed
            }
            Some(Err(e)) => self.handle_failure(job, e, shutdown).await,
        }
    }

    async fn handle_failure(
        &self,
        mut job: Job,
        error: TranslationError,
        shutdown: CancellationToken,
    ) -> JobOutcome {
        let failure = classify(&error);

        if !failure.retryable {
            warn!("Job {} failed ({}): {}", job.id, failure.code, error);
            self.fail(&job, &failure).await;
            return JobOutcome::Failed;
        }

        if job.retry_count >= self.config.max_retries {
            warn!(
                "Job {} failed ({}) after {} retries: {}",
                job.id, failure.code, job.retry_count, error
            );
            self.fail(&job, &failure).await;
            return JobOutcome::Failed;
        }

        job.retry_count += 1;
        // Never earlier than the Retry-After the API asked for
        let delay = (self.config.retry_delay * job.retry_count)
            .max(error.retry_after().unwrap_or_default());
        self.metrics.record_retried();
        info!(
            "Job {} failed ({}), retry {}/{} in {:?}",
            job.id, failure.code, job.retry_count, self.config.max_retries, delay
        );

        let priority = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Priority::High,
            _ = sleep(delay) => Priority::Normal,
        };

        if !self.hand_back(job, priority).await {
            return JobOutcome::Failed;
        }

        match priority {
            Priority::High => {
                self.metrics.record_interrupted();
                JobOutcome::Interrupted
            }
            Priority::Normal => JobOutcome::Retrying,
        }
    }

    /// Requeue a job. If the queue refuses it, the message is failed instead of
    /// silently dropped. Returns whether the job went back on the queue.
    async fn hand_back(&self, mut job: Job, priority: Priority) -> bool {
        job.priority = priority;
        match self.queue.requeue(job.clone(), priority).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to requeue job {}: {}", job.id, e);
                self.fail(&job, &Failure::queue_unavailable()).await;
                false
            }
        }
    }

    async fn complete(&self, job: &Job, response: TranslateResponse) {
        let TranslateResponse {
            translations,
            detected_language,
            from_cache,
        } = response;

        self.mark(StatusUpdate::completed(
            &job.target_ref,
            job.id,
            translations.clone(),
        ))
        .await;

        self.notifier
            .broadcast(
                &job.scope_ref,
                EVENT_COMPLETED,
                json!({
                    "targetRef": job.target_ref,
                    "jobId": job.id,
                    "translations": translations,
                    "detectedLanguage": detected_language,
                }),
            )
            .await;

        self.metrics.record_completed();
        info!(
            "Job {} completed ({} languages{})",
            job.id,
            translations.len(),
            if from_cache { ", cached" } else { "" }
        );
    }

    async fn fail(&self, job: &Job, failure: &Failure) {
        self.mark(StatusUpdate::new(&job.target_ref, job.id, TranslationState::Failed))
            .await;

        self.notifier
            .broadcast(
                &job.scope_ref,
                EVENT_FAILED,
                json!({
                    "targetRef": job.target_ref,
                    "jobId": job.id,
                    "error": {
                        "category": failure.category,
                        "code": failure.code,
                        "message": failure.safe_message,
                    },
                }),
            )
            .await;

        self.metrics.record_failed();
    }

    async fn mark(&self, update: StatusUpdate) {
        let target_ref = update.target_ref.clone();
        let state = update.state;
        if let Err(e) = self.store.update_status(update).await {
            warn!(
                "Failed to record state {:?} for message {}: {}",
                state, target_ref, e
            );
        }
    }
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Translation job panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{InMemoryMessageStore, InMemoryNotifier};
    use crate::provider::{ApiTranslation, MemoryCache, TranslationApi};
    use crate::queue::MemoryJobQueue;
    use async_trait::async_trait;
    use std::collections::{BTreeMap, VecDeque};
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Copy)]
    enum Step {
        Ok,
        RateLimited,
        /// 429 with a `Retry-After` of this many seconds
        RateLimitedFor(u64),
        Unauthorized,
        Hang,
    }

    /// Plays back scripted results; once the script runs out every call succeeds.
    struct ScriptedApi {
        script: parking_lot::Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedApi {
        fn new(steps: &[Step]) -> Arc<Self> {
            Arc::new(Self {
                script: parking_lot::Mutex::new(steps.iter().copied().collect()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationApi for ScriptedApi {
        async fn translate(
            &self,
            _text: &str,
            _source_language: &str,
            target_languages: &[String],
            _tone: Option<&str>,
        ) -> Result<ApiTranslation, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front().unwrap_or(Step::Ok);
            match step {
                Step::Ok => Ok(ApiTranslation {
                    translations: target_languages
                        .iter()
                        .map(|t| (t.clone(), format!("[{}]", t)))
                        .collect::<BTreeMap<_, _>>(),
                    detected_language: Some("en".to_string()),
                }),
                Step::RateLimited => Err(TranslationError::RateLimited { retry_after: None }),
                Step::RateLimitedFor(secs) => Err(TranslationError::RateLimited {
                    retry_after: Some(Duration::from_secs(secs)),
                }),
                Step::Unauthorized => Err(TranslationError::Unauthorized { status: 401 }),
                Step::Hang => {
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    struct Harness {
        pool: WorkerPool,
        queue: Arc<MemoryJobQueue>,
        store: Arc<InMemoryMessageStore>,
        notifier: Arc<InMemoryNotifier>,
    }

    fn harness(api: Arc<ScriptedApi>, config: WorkerConfig) -> Harness {
        let metrics = Arc::new(PipelineMetrics::new());
        let provider = Arc::new(TranslationProvider::new(
            api,
            Arc::new(MemoryCache::new(NonZeroUsize::new(16).unwrap())),
            Duration::from_secs(60),
            metrics.clone(),
        ));
        let queue = Arc::new(MemoryJobQueue::new());
        let store = Arc::new(InMemoryMessageStore::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let pool = WorkerPool::new(
            config,
            queue.clone(),
            provider,
            store.clone(),
            notifier.clone(),
            metrics,
        );
        Harness {
            pool,
            queue,
            store,
            notifier,
        }
    }

    fn fast_config() -> WorkerConfig {
        WorkerConfig {
            max_concurrent_jobs: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(5),
            job_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    fn job(target: &str) -> Job {
        Job::new(target, "room-1", "hello", "auto", &["pl"]).unwrap()
    }

    // ==================== Outcomes ====================

    #[tokio::test]
    async fn test_success_marks_completed_and_broadcasts() {
        let api = ScriptedApi::new(&[]);
        let h = harness(api.clone(), fast_config());

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Completed);
        assert_eq!(
            h.store.history("m1"),
            vec![TranslationState::InProgress, TranslationState::Completed]
        );
        let events = h.notifier.events_named(EVENT_COMPLETED);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].scope_ref, "room-1");
        assert_eq!(events[0].payload["translations"]["pl"], "[pl]");
        assert_eq!(events[0].payload["detectedLanguage"], "en");
    }

    #[tokio::test]
    async fn test_retryable_failure_requeues_with_incremented_count() {
        let api = ScriptedApi::new(&[Step::RateLimited]);
        let h = harness(api, fast_config());

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Retrying);
        let requeued = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(h.store.state("m1"), TranslationState::InProgress);
        assert!(h.notifier.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_out_rate_limit_cooldown() {
        let api = ScriptedApi::new(&[Step::RateLimitedFor(60)]);
        let h = harness(api, fast_config());
        let start = tokio::time::Instant::now();

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Retrying);
        assert!(start.elapsed() >= Duration::from_secs(60));
        let requeued = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.priority, Priority::Normal);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_fails_immediately() {
        let api = ScriptedApi::new(&[Step::Unauthorized]);
        let h = harness(api.clone(), fast_config());

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(api.calls(), 1);
        assert_eq!(h.queue.len().await.unwrap(), 0);
        assert_eq!(h.store.state("m1"), TranslationState::Failed);

        let failed = h.notifier.events_named(EVENT_FAILED);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload["error"]["code"], "UNAUTHORIZED");
        assert_eq!(failed[0].payload["error"]["category"], "api");
    }

    #[tokio::test]
    async fn test_exhausted_budget_fails() {
        let api = ScriptedApi::new(&[Step::RateLimited]);
        let h = harness(api, fast_config());
        let mut exhausted = job("m1");
        exhausted.retry_count = 3;

        let outcome = h.pool.process(exhausted, CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(h.queue.len().await.unwrap(), 0);
        let failed = h.notifier.events_named(EVENT_FAILED);
        assert_eq!(failed[0].payload["error"]["code"], "RATE_LIMITED");
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_timeout_is_classified_as_timeout() {
        let api = ScriptedApi::new(&[Step::Hang]);
        let mut config = fast_config();
        config.max_retries = 0;
        let h = harness(api, config);

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Failed);
        let failed = h.notifier.events_named(EVENT_FAILED);
        assert_eq!(failed[0].payload["error"]["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn test_failed_payload_never_contains_content() {
        let api = ScriptedApi::new(&[Step::Unauthorized]);
        let h = harness(api, fast_config());
        let secret = Job::new("m1", "room-1", "my bank pin is 1234", "auto", &["pl"]).unwrap();

        h.pool.process(secret, CancellationToken::new()).await;

        let payload = h.notifier.events()[0].payload.to_string();
        assert!(!payload.contains("1234"));
    }

    // ==================== Shutdown ====================

    #[tokio::test]
    async fn test_shutdown_during_call_requeues_high_without_retry_increment() {
        let api = ScriptedApi::new(&[Step::Hang]);
        let h = harness(api, fast_config());
        h.queue.enqueue(job("waiting")).await.unwrap();

        let token = CancellationToken::new();
        let task = {
            let pool = h.pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.process(job("m1"), token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert_eq!(task.await.unwrap(), JobOutcome::Interrupted);
        let next = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(next.target_ref, "m1", "interrupted job should jump the line");
        assert_eq!(next.retry_count, 0);
        assert_eq!(next.priority, Priority::High);
    }

    #[tokio::test]
    async fn test_shutdown_during_backoff_requeues_high_keeping_count() {
        let api = ScriptedApi::new(&[Step::RateLimited]);
        let mut config = fast_config();
        config.retry_delay = Duration::from_secs(60);
        let h = harness(api, config);
        h.queue.enqueue(job("waiting")).await.unwrap();

        let token = CancellationToken::new();
        let task = {
            let pool = h.pool.clone();
            let token = token.clone();
            tokio::spawn(async move { pool.process(job("m1"), token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert_eq!(task.await.unwrap(), JobOutcome::Interrupted);
        let next = h.queue.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(next.target_ref, "m1");
        assert_eq!(next.retry_count, 1);
    }

    #[tokio::test]
    async fn test_requeue_failure_marks_queue_unavailable() {
        let api = ScriptedApi::new(&[Step::RateLimited]);
        let h = harness(api, fast_config());
        h.queue.close();

        let outcome = h.pool.process(job("m1"), CancellationToken::new()).await;

        assert_eq!(outcome, JobOutcome::Failed);
        assert_eq!(h.store.state("m1"), TranslationState::Failed);
        let failed = h.notifier.events_named(EVENT_FAILED);
        assert_eq!(failed[0].payload["error"]["code"], "QUEUE_UNAVAILABLE");
    }

    #[test]
    fn test_worker_config_from_config() {
        let config = Config {
            max_concurrent_jobs: 7,
            retry_delay_seconds: 2,
            poll_interval_ms: 250,
            ..Config::default()
        };

        let worker = WorkerConfig::from_config(&config);

        assert_eq!(worker.max_concurrent_jobs, 7);
        assert_eq!(worker.retry_delay, Duration::from_secs(2));
        assert_eq!(worker.poll_interval, Duration::from_millis(250));
        assert_eq!(worker.max_retries, 3);
    }
}
