//! The unit of translation work and the message translation state machine.

use crate::language;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier, assigned once at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

/// Lifecycle of a message's translation, as recorded by the message store.
///
/// `None` and `Pending` are written by producers; the worker pool owns
/// `InProgress`, `Completed` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationState {
    None,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TranslationState {
    fn rank(self) -> u8 {
        match self {
            TranslationState::None => 0,
            TranslationState::Pending => 1,
            TranslationState::InProgress => 2,
            TranslationState::Completed | TranslationState::Failed => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TranslationState::Completed | TranslationState::Failed)
    }

    /// Whether moving from `self` to `next` respects the lifecycle.
    ///
    /// Re-writing the current state is allowed. Terminal states are only reachable
    /// from `InProgress`, and nothing leaves a terminal state.
    pub fn can_transition_to(self, next: TranslationState) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return self == TranslationState::InProgress;
        }
        next.rank() > self.rank()
    }
}

/// One translation unit of work.
///
/// The original text lives in `content`; it never appears in logs. The `Debug`
/// implementation redacts it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub target_ref: String,
    pub scope_ref: String,
    pub content: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    #[serde(default)]
    pub tone: Option<String>,
    /// Lane of the most recent enqueue or requeue
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Build a job, normalizing languages. The fallback language is added to the
    /// target set when missing.
    pub fn new(
        target_ref: impl Into<String>,
        scope_ref: impl Into<String>,
        content: impl Into<String>,
        source_language: &str,
        target_languages: &[impl AsRef<str>],
    ) -> Result<Self, String> {
        let target_ref = target_ref.into();
        if target_ref.trim().is_empty() {
            return Err("target reference must not be empty".to_string());
        }

        Ok(Self {
            id: JobId::new(),
            target_ref,
            scope_ref: scope_ref.into(),
            content: content.into(),
            source_language: language::normalize_source(source_language)?,
            target_languages: language::normalize_targets(target_languages)?,
            tone: None,
            priority: Priority::Normal,
            retry_count: 0,
            created_at: Utc::now(),
        })
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        let tone = tone.into();
        self.tone = if tone.trim().is_empty() { None } else { Some(tone) };
        self
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("target_ref", &self.target_ref)
            .field("scope_ref", &self.scope_ref)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .field("source_language", &self.source_language)
            .field("target_languages", &self.target_languages)
            .field("tone", &self.tone)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("created_at", &self.created_at)
            .finish()
    }
}
