//! Asynchronous message-translation pipeline.
//!
//! Producers call [`service::TranslationService::enqueue`]; a [`worker::WorkerPool`]
//! pulls jobs from the shared [`queue::JobQueue`], translates them through the
//! cache-aside [`provider::TranslationProvider`] and reports outcomes through the
//! [`adapters`] traits.

pub mod adapters;
pub mod classifier;
pub mod config;
pub mod error;
pub mod job;
pub mod language;
pub mod metrics;
pub mod provider;
pub mod queue;
pub mod retry;
pub mod server;
pub mod service;
pub mod worker;
