//! Outbound collaborators of the worker pool: the message store and the chat
//! notification channel.
//!
//! Real deployments supply their own implementations. The in-memory ones here back
//! the binary's reference wiring and the tests.

use crate::error::StoreError;
use crate::job::{JobId, TranslationState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use tracing::info;

pub const EVENT_COMPLETED: &str = "translation.completed";
pub const EVENT_FAILED: &str = "translation.failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub target_ref: String,
    pub state: TranslationState,
    pub translations: Option<BTreeMap<String, String>>,
    pub job_id: JobId,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusUpdate {
    pub fn new(target_ref: impl Into<String>, job_id: JobId, state: TranslationState) -> Self {
        Self {
            target_ref: target_ref.into(),
            state,
            translations: None,
            job_id,
            completed_at: None,
        }
    }

    pub fn completed(
        target_ref: impl Into<String>,
        job_id: JobId,
        translations: BTreeMap<String, String>,
    ) -> Self {
        Self {
            translations: Some(translations),
            completed_at: Some(Utc::now()),
            ..Self::new(target_ref, job_id, TranslationState::Completed)
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), StoreError>;
}

/// Fire-and-forget broadcast to everyone in a scope (room).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    async fn broadcast(&self, scope_ref: &str, event_name: &str, payload: serde_json::Value);
}

/// Message store that keeps every accepted update in memory and rejects transitions
/// the lifecycle does not allow.
///
/// History is keyed by `target_ref`, so a message that reached `Completed` or `Failed`
/// keeps that state: a later job for the same message is recorded nowhere, even though
/// its outcome is still broadcast. Stores that support re-translation should key their
/// history by job id instead.
#[derive(Default)]
pub struct InMemoryMessageStore {
    records: Mutex<HashMap<String, Vec<StatusUpdate>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest accepted state for a message, `None` state when never written.
    pub fn state(&self, target_ref: &str) -> TranslationState {
        self.records
            .lock()
            .get(target_ref)
            .and_then(|updates| updates.last())
            .map(|u| u.state)
            .unwrap_or(TranslationState::None)
    }

    /// Every accepted state for a message, in write order.
    pub fn history(&self, target_ref: &str) -> Vec<TranslationState> {
        self.records
            .lock()
            .get(target_ref)
            .map(|updates| updates.iter().map(|u| u.state).collect())
            .unwrap_or_default()
    }

    pub fn last_update(&self, target_ref: &str) -> Option<StatusUpdate> {
        self.records
            .lock()
            .get(target_ref)
            .and_then(|updates| updates.last().cloned())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn update_status(&self, update: StatusUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        let updates = records.entry(update.target_ref.clone()).or_default();
        let current = updates
            .last()
            .map(|u| u.state)
            .unwrap_or(TranslationState::None);

        if !current.can_transition_to(update.state) {
            return Err(StoreError::IllegalTransition {
                from: current,
                to: update.state,
            });
        }

        updates.push(update);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub scope_ref: String,
    pub event_name: String,
    pub payload: serde_json::Value,
}

/// Notification channel that records events for later inspection.
#[derive(Default)]
pub struct InMemoryNotifier {
    events: Mutex<Vec<RecordedEvent>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    pub fn events_named(&self, event_name: &str) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_name == event_name)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for InMemoryNotifier {
    async fn broadcast(&self, scope_ref: &str, event_name: &str, payload: serde_json::Value) {
        self.events.lock().push(RecordedEvent {
            scope_ref: scope_ref.to_string(),
            event_name: event_name.to_string(),
            payload,
        });
    }
}

/// Notification channel that only logs the event name and scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl NotificationChannel for TracingNotifier {
    async fn broadcast(&self, scope_ref: &str, event_name: &str, payload: serde_json::Value) {
        let target_ref = payload
            .get("targetRef")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        info!("Broadcast {} to {} (message {})", event_name, scope_ref, target_ref);
    }
}
