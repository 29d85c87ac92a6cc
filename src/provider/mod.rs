//! Cache-aside translation provider.
//!
//! [`TranslationProvider`] checks the cache, falls back to the external
//! [`TranslationApi`] on a miss and stores the result. The cache is advisory: any
//! cache failure is logged and treated as a miss.
//!
//! - `cache`: key derivation and cache backends (memory LRU, Redis)
//! - `http`: reqwest-based API adapter with transport retry and rate-limit cooldown

pub mod cache;
pub mod http;

pub use cache::{cache_key, MemoryCache, RedisCache, TranslationCache};
pub use http::{Cooldown, HttpTranslationApi};

use crate::error::TranslationError;
use crate::job::Job;
use crate::language;
use crate::metrics::PipelineMetrics;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Result of one external API call; also the cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTranslation {
    /// Target language code -> translated text
    pub translations: BTreeMap<String, String>,
    #[serde(default)]
    pub detected_language: Option<String>,
}

/// The remote translation service, treated as opaque.
#[async_trait]
pub trait TranslationApi: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_languages: &[String],
        tone: Option<&str>,
    ) -> Result<ApiTranslation, TranslationError>;
}

#[derive(Debug, Clone)]
pub struct TranslateRequest {
    pub text: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub tone: Option<String>,
    /// Skip the cache read (the result is still written back)
    pub force_refresh: bool,
}

impl TranslateRequest {
    pub fn from_job(job: &Job) -> Self {
        Self {
            text: job.content.clone(),
            source_language: job.source_language.clone(),
            target_languages: job.target_languages.clone(),
            tone: job.tone.clone(),
            force_refresh: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateResponse {
    pub translations: BTreeMap<String, String>,
    pub detected_language: Option<String>,
    pub from_cache: bool,
}

impl TranslateResponse {
    fn new(result: ApiTranslation, from_cache: bool) -> Self {
        Self {
            translations: result.translations,
            detected_language: result.detected_language,
            from_cache,
        }
    }
}

/// Upper bound for a single cache read or write
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(500);

pub struct TranslationProvider {
    api: Arc<dyn TranslationApi>,
    cache: Arc<dyn TranslationCache>,
    cache_ttl: Duration,
    cache_timeout: Duration,
    metrics: Arc<PipelineMetrics>,
}

impl TranslationProvider {
    pub fn new(
        api: Arc<dyn TranslationApi>,
        cache: Arc<dyn TranslationCache>,
        cache_ttl: Duration,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            api,
            cache,
            cache_ttl,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            metrics,
        }
    }

    pub fn with_cache_timeout(mut self, cache_timeout: Duration) -> Self {
        self.cache_timeout = cache_timeout;
        self
    }

    /// Translate, serving from cache when possible.
    ///
    /// Fails with [`TranslationError::InvalidTargets`] when the target list is empty or
    /// lacks the fallback language. Errors are returned unclassified.
    pub async fn translate(
        &self,
        request: &TranslateRequest,
    ) -> Result<TranslateResponse, TranslationError> {
        language::validate_targets(&request.target_languages)
            .map_err(TranslationError::InvalidTargets)?;

        let key = cache_key(
            &request.text,
            &request.source_language,
            &request.target_languages,
            request.tone.as_deref(),
        );

        if !request.force_refresh {
            match timeout(self.cache_timeout, self.cache.get(&key)).await {
                Ok(Ok(Some(cached))) => {
                    self.metrics.record_cache_hit();
                    debug!("Translation cache hit ({})", short_key(&key));
                    return Ok(TranslateResponse::new(cached, true));
                }
                Ok(Ok(None)) => self.metrics.record_cache_miss(),
                Ok(Err(e)) => {
                    self.metrics.record_cache_miss();
                    warn!("Translation cache read failed, treating as miss: {}", e);
                }
                Err(_) => {
                    self.metrics.record_cache_miss();
                    warn!(
                        "Translation cache read timed out after {:?}, treating as miss",
                        self.cache_timeout
                    );
                }
            }
        }

        self.metrics.record_api_request();
        let result = match self
            .api
            .translate(
                &request.text,
                &request.source_language,
                &request.target_languages,
                request.tone.as_deref(),
            )
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.metrics.record_api_error();
                return Err(e);
            }
        };

        if !self.cache_ttl.is_zero() {
            match timeout(self.cache_timeout, self.cache.set(&key, &result, self.cache_ttl)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Translation cache write failed: {}", e),
                Err(_) => warn!("Translation cache write timed out after {:?}", self.cache_timeout),
            }
        }

        Ok(TranslateResponse::new(result, false))
    }
}

fn short_key(key: &str) -> &str {
    &key[..key.len().min(12)]
}
