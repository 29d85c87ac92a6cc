//! Error types shared across the pipeline.
//!
//! Provider-side failures are expressed as a closed set of [`TranslationError`]
//! variants so the classifier can match on them. Only [`TranslationError::Other`]
//! carries an opaque third-party error.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the translation provider and the external API adapter.
///
/// Display strings may contain provider details (status codes, reasons). They are
/// meant for logs only; anything shown to end users goes through
/// [`crate::classifier::classify`].
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("translation is disabled")]
    Disabled,

    #[error("translation API credentials are not configured")]
    MissingCredentials,

    #[error("invalid target languages: {0}")]
    InvalidTargets(String),

    #[error("translation request timed out")]
    Timeout,

    #[error("translation API rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("translation API unavailable ({status})")]
    Unavailable { status: u16 },

    #[error("translation API rejected the credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("translation API denied access ({status})")]
    Forbidden { status: u16 },

    #[error("translation API endpoint not found ({status})")]
    NotFound { status: u16 },

    #[error("translation API rejected the request ({status})")]
    BadRequest { status: u16 },

    #[error("malformed translation API response: {0}")]
    MalformedResponse(String),

    #[error("transport error talking to translation API: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TranslationError {
    /// How long the API asked callers to stay away, if it said so.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            TranslationError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Whether the API adapter may retry this error itself, within a single job attempt.
    ///
    /// Rate limiting is not included; it sets a cooldown and goes to the job-level retry.
    pub fn is_transient_transport(&self) -> bool {
        matches!(
            self,
            TranslationError::Transport(_)
                | TranslationError::Timeout
                | TranslationError::Unavailable { .. }
        )
    }
}

impl From<reqwest::Error> for TranslationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TranslationError::Timeout
        } else if err.is_decode() {
            TranslationError::MalformedResponse(err.to_string())
        } else {
            TranslationError::Transport(err.without_url().to_string())
        }
    }
}

/// Errors raised by [`crate::queue::JobQueue`] implementations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Translation is switched off; producers must fail fast.
    #[error("translation queue is disabled")]
    Disabled,

    /// Backend cannot be reached or has been closed.
    #[error("translation queue unavailable: {0}")]
    Unavailable(String),

    /// Job payload could not be (de)serialized.
    #[error("job serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Any other backend failure.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// Rejected before reaching the queue.
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            QueueError::Unavailable(err.to_string())
        } else {
            QueueError::Backend(err.to_string())
        }
    }
}

/// Errors raised by translation cache backends. Always swallowed by the provider.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),

    #[error("cache entry could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

/// Errors raised by message store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("illegal translation state transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: crate::job::TranslationState,
        to: crate::job::TranslationState,
    },

    #[error("message store error: {0}")]
    Backend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_retry_covers_network_and_5xx_only() {
        assert!(TranslationError::Transport("reset".into()).is_transient_transport());
        assert!(TranslationError::Timeout.is_transient_transport());
        assert!(TranslationError::Unavailable { status: 503 }.is_transient_transport());

        assert!(!TranslationError::RateLimited { retry_after: None }.is_transient_transport());
        assert!(!TranslationError::Unauthorized { status: 401 }.is_transient_transport());
        assert!(!TranslationError::BadRequest { status: 400 }.is_transient_transport());
        assert!(!TranslationError::MissingCredentials.is_transient_transport());
    }

    #[test]
    fn test_error_display_has_no_payload_fields() {
        let err = TranslationError::Unavailable { status: 502 };
        assert_eq!(err.to_string(), "translation API unavailable (502)");
    }

    #[test]
    fn test_queue_error_from_json() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: QueueError = json_err.into();
        assert!(matches!(err, QueueError::Serialization(_)));
    }
}
