//! Producer-side entry point: turns "translate this message" requests into queued jobs.

use crate::adapters::{MessageStore, StatusUpdate};
use crate::config::Config;
use crate::error::{QueueError, StoreError};
use crate::job::{Job, JobId, Priority, TranslationState};
use crate::queue::JobQueue;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub target_ref: String,
    pub scope_ref: String,
    pub content: String,
    /// Language code, or empty / `"auto"` to let the API detect it
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub priority: Priority,
    pub tone: Option<String>,
}

pub struct TranslationService {
    enabled: bool,
    queue: Arc<dyn JobQueue>,
    store: Arc<dyn MessageStore>,
}

impl TranslationService {
    pub fn new(enabled: bool, queue: Arc<dyn JobQueue>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            enabled,
            queue,
            store,
        }
    }

    pub fn from_config(
        config: &Config,
        queue: Arc<dyn JobQueue>,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self::new(config.enabled, queue, store)
    }

    /// Validate, mark the message `Pending` and queue the job.
    ///
    /// Fails fast with [`QueueError::Disabled`] when translation is switched off and
    /// with [`QueueError::InvalidJob`] on bad language codes. `High` priority requests
    /// go ahead of everything already waiting.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<JobId, QueueError> {
        if !self.enabled {
            return Err(QueueError::Disabled);
        }

        let mut job = Job::new(
            request.target_ref,
            request.scope_ref,
            request.content,
            &request.source_language,
            &request.target_languages,
        )
        .map_err(QueueError::InvalidJob)?
        .with_priority(request.priority);
        if let Some(tone) = request.tone {
            job = job.with_tone(tone);
        }

        let job_id = job.id;
        let target_ref = job.target_ref.clone();
        let languages = job.target_languages.len();

        match job.priority {
            Priority::High => self.queue.requeue(job, Priority::High).await?,
            Priority::Normal => {
                self.queue.enqueue(job).await?;
            }
        }

        // Only after the queue accepted the job. A worker may already have moved the
        // message on, in which case the store rejects this write.
        match self
            .store
            .update_status(StatusUpdate::new(&target_ref, job_id, TranslationState::Pending))
            .await
        {
            Ok(()) => {}
            Err(StoreError::IllegalTransition { from, .. }) => {
                debug!("Message {} already {:?}, skipping pending mark", target_ref, from);
            }
            Err(e) => warn!("Failed to mark message {} pending: {}", target_ref, e),
        }

        info!(
            "Queued translation job {} for message {} ({} languages)",
            job_id, target_ref, languages
        );
        Ok(job_id)
    }

    /// Remove a job that no worker has picked up yet.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool, QueueError> {
        let removed = self.queue.remove(job_id).await?;
        if removed {
            info!("Cancelled translation job {}", job_id);
        }
        Ok(removed)
    }

    pub async fn backlog(&self) -> Result<usize, QueueError> {
        self.queue.len().await
    }
}
