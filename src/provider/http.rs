//! reqwest adapter for the external translation API.
//!
//! Request: `POST {endpoint}` with `{"text", "source_lang", "target_langs", "tone"}` and a
//! bearer token. Response: `{"translations": {"<code>": "<text>"}, "detected_language"}`.

use super::{ApiTranslation, TranslationApi};
use crate::error::TranslationError;
use crate::retry::{with_retry_if, RetryConfig};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Rate-limit cooldown owned by the adapter that talks to the rate-limited service.
///
/// While active, calls fail fast instead of hitting the API again.
#[derive(Debug, Default)]
pub struct Cooldown {
    until: Mutex<Option<Instant>>,
}

impl Cooldown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before calls may resume, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let mut until = self.until.lock();
        match *until {
            Some(deadline) => {
                let now = Instant::now();
                if deadline > now {
                    Some(deadline - now)
                } else {
                    *until = None;
                    None
                }
            }
            None => None,
        }
    }

    /// Start or extend the cooldown. A shorter request never cuts an active one short.
    pub fn trigger(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        let mut until = self.until.lock();
        match *until {
            Some(current) if current >= deadline => {}
            _ => *until = Some(deadline),
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiRequestBody<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_langs: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    tone: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApiResponseBody {
    translations: BTreeMap<String, String>,
    #[serde(default)]
    detected_language: Option<String>,
}

pub struct HttpTranslationApi {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryConfig,
    cooldown: Cooldown,
    default_cooldown: Duration,
}

impl HttpTranslationApi {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, TranslationError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout.min(Duration::from_secs(5)))
            .pool_max_idle_per_host(8)
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            retry: RetryConfig::transport(),
            cooldown: Cooldown::new(),
            default_cooldown: Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Cooldown applied after a 429 without a usable `Retry-After` header.
    pub fn with_default_cooldown(mut self, cooldown: Duration) -> Self {
        self.default_cooldown = cooldown;
        self
    }

    pub fn cooldown(&self) -> &Cooldown {
        &self.cooldown
    }

    async fn send_once(
        &self,
        api_key: &str,
        body: &ApiRequestBody<'_>,
    ) -> Result<ApiTranslation, TranslationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // The body may echo the submitted text, so only the status is kept
            return Err(self.status_error(status, response.headers()));
        }

        let parsed: ApiResponseBody = response.json().await?;

        let missing: Vec<&str> = body
            .target_langs
            .iter()
            .filter(|t| !parsed.translations.contains_key(t.as_str()))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(TranslationError::MalformedResponse(format!(
                "response is missing target languages: {}",
                missing.join(", ")
            )));
        }

        Ok(ApiTranslation {
            translations: parsed.translations,
            detected_language: parsed.detected_language,
        })
    }

    fn status_error(&self, status: StatusCode, headers: &reqwest::header::HeaderMap) -> TranslationError {
        let code = status.as_u16();
        match status {
            StatusCode::UNAUTHORIZED => TranslationError::Unauthorized { status: code },
            StatusCode::FORBIDDEN => TranslationError::Forbidden { status: code },
            StatusCode::NOT_FOUND => TranslationError::NotFound { status: code },
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = headers
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                let cooldown = retry_after.unwrap_or(self.default_cooldown);
                warn!("Translation API rate limited, cooling down for {:?}", cooldown);
                self.cooldown.trigger(cooldown);
                TranslationError::RateLimited { retry_after }
            }
            s if s == StatusCode::BAD_REQUEST || s == StatusCode::UNPROCESSABLE_ENTITY => {
                TranslationError::BadRequest { status: code }
            }
            s if s.is_server_error() => TranslationError::Unavailable { status: code },
            _ => TranslationError::Other(anyhow::anyhow!(
                "unexpected translation API status {}",
                status
            )),
        }
    }
}

#[async_trait]
impl TranslationApi for HttpTranslationApi {
    async fn translate(
        &self,
        text: &str,
        source_language: &str,
        target_languages: &[String],
        tone: Option<&str>,
    ) -> Result<ApiTranslation, TranslationError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(TranslationError::MissingCredentials)?;

        if let Some(remaining) = self.cooldown.remaining() {
            debug!("Translation API cooldown active for another {:?}", remaining);
            return Err(TranslationError::RateLimited {
                retry_after: Some(remaining),
            });
        }

        let body = ApiRequestBody {
            text,
            source_lang: source_language,
            target_langs: target_languages,
            tone,
        };

        with_retry_if(
            &self.retry,
            "Translation API",
            || self.send_once(api_key, &body),
            TranslationError::is_transient_transport,
        )
        .await
    }
}
