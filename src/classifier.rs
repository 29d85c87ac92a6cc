//! Maps translation errors onto a stable, user-safe failure description.
//!
//! Pure and side-effect free. Typed variants are matched exhaustively; free-text
//! inspection is limited to [`TranslationError::Other`], which wraps errors from
//! third-party code we do not control.

use crate::error::TranslationError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Configuration,
    Api,
    Content,
    Unknown,
}

/// Classified failure. `safe_message` is the only text that may reach end users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub category: FailureCategory,
    pub code: &'static str,
    pub safe_message: &'static str,
    pub retryable: bool,
}

impl Failure {
    const fn new(
        category: FailureCategory,
        code: &'static str,
        safe_message: &'static str,
        retryable: bool,
    ) -> Self {
        Self {
            category,
            code,
            safe_message,
            retryable,
        }
    }

    /// Used by the worker pool when a retry could not be handed back to the queue.
    pub const fn queue_unavailable() -> Self {
        Self::new(
            FailureCategory::Configuration,
            "QUEUE_UNAVAILABLE",
            "translation failed: queue unavailable",
            false,
        )
    }
}

const DISABLED: Failure = Failure::new(
    FailureCategory::Configuration,
    "TRANSLATION_DISABLED",
    "translation failed: translation is disabled",
    false,
);
const MISSING_CREDENTIALS: Failure = Failure::new(
    FailureCategory::Configuration,
    "MISSING_CREDENTIALS",
    "translation failed: service is not configured",
    false,
);
const INVALID_TARGETS: Failure = Failure::new(
    FailureCategory::Configuration,
    "INVALID_TARGETS",
    "translation failed: unsupported target languages",
    false,
);
const TIMEOUT: Failure = Failure::new(
    FailureCategory::Api,
    "TIMEOUT",
    "translation failed: service timed out",
    true,
);
const RATE_LIMITED: Failure = Failure::new(
    FailureCategory::Api,
    "RATE_LIMITED",
    "translation failed: service is busy",
    true,
);
const SERVICE_UNAVAILABLE: Failure = Failure::new(
    FailureCategory::Api,
    "SERVICE_UNAVAILABLE",
    "translation failed: service unavailable",
    true,
);
const NETWORK_ERROR: Failure = Failure::new(
    FailureCategory::Api,
    "NETWORK_ERROR",
    "translation failed: service unreachable",
    true,
);
const UNAUTHORIZED: Failure = Failure::new(
    FailureCategory::Api,
    "UNAUTHORIZED",
    "translation failed: service rejected credentials",
    false,
);
const FORBIDDEN: Failure = Failure::new(
    FailureCategory::Api,
    "FORBIDDEN",
    "translation failed: access denied",
    false,
);
const NOT_FOUND: Failure = Failure::new(
    FailureCategory::Api,
    "NOT_FOUND",
    "translation failed: service endpoint not found",
    false,
);
const INVALID_REQUEST: Failure = Failure::new(
    FailureCategory::Content,
    "INVALID_REQUEST",
    "translation failed: message could not be processed",
    false,
);
const MALFORMED_RESPONSE: Failure = Failure::new(
    FailureCategory::Unknown,
    "MALFORMED_RESPONSE",
    "translation failed: unexpected service response",
    true,
);
const UNKNOWN: Failure = Failure::new(
    FailureCategory::Unknown,
    "UNKNOWN",
    "translation failed: unexpected error",
    true,
);

/// Classify an error. Unrecognized errors are retryable.
pub fn classify(error: &TranslationError) -> Failure {
    match error {
        TranslationError::Disabled => DISABLED,
        TranslationError::MissingCredentials => MISSING_CREDENTIALS,
        TranslationError::InvalidTargets(_) => INVALID_TARGETS,
        TranslationError::Timeout => TIMEOUT,
        TranslationError::RateLimited { .. } => RATE_LIMITED,
        TranslationError::Unavailable { .. } => SERVICE_UNAVAILABLE,
        TranslationError::Transport(_) => NETWORK_ERROR,
        TranslationError::Unauthorized { .. } => UNAUTHORIZED,
        TranslationError::Forbidden { .. } => FORBIDDEN,
        TranslationError::NotFound { .. } => NOT_FOUND,
        TranslationError::BadRequest { .. } => INVALID_REQUEST,
        TranslationError::MalformedResponse(_) => MALFORMED_RESPONSE,
        TranslationError::Other(inner) => classify_opaque(&format!("{:#}", inner)),
    }
}

/// Last-resort text matching for third-party errors. Order matters: the first
/// matching rule wins.
fn classify_opaque(text: &str) -> Failure {
    let text = text.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| text.contains(n));

    if has(&["disabled"]) {
        DISABLED
    } else if has(&["api key", "credential", "apikey"]) {
        MISSING_CREDENTIALS
    } else if has(&["timed out", "timeout", "deadline"]) {
        TIMEOUT
    } else if has(&["429", "rate limit", "too many requests"]) {
        RATE_LIMITED
    } else if has(&["401", "unauthorized", "unauthenticated"]) {
        UNAUTHORIZED
    } else if has(&["403", "forbidden"]) {
        FORBIDDEN
    } else if has(&["404", "not found"]) {
        NOT_FOUND
    } else if has(&["503", "502", "500", "unavailable", "bad gateway"]) {
        SERVICE_UNAVAILABLE
    } else if has(&["connection refused", "connection reset", "dns", "network"]) {
        NETWORK_ERROR
    } else if has(&["400", "bad request", "malformed request", "invalid request"]) {
        INVALID_REQUEST
    } else {
        UNKNOWN
    }
}
