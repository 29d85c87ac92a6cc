//! `GET /health`: queue backlog and pipeline counters for this dispatcher.

use crate::metrics::{MetricsReport, PipelineMetrics};
use crate::queue::JobQueue;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<dyn JobQueue>,
    pub metrics: Arc<PipelineMetrics>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// `None` when the queue backend could not be reached
    pub queue_length: Option<usize>,
    pub metrics: MetricsReport,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let metrics = state.metrics.report();
    match state.queue.len().await {
        Ok(len) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok",
                queue_length: Some(len),
                metrics,
            }),
        ),
        Err(e) => {
            warn!("Health check could not reach the queue: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    queue_length: None,
                    metrics,
                }),
            )
        }
    }
}

/// Bind `0.0.0.0:{port}` and serve until `shutdown` resolves.
pub async fn serve(
    state: AppState,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {}", addr))?;

    info!("Health server listening on {}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Health server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::Job;
    use crate::queue::MemoryJobQueue;

    #[tokio::test]
    async fn test_health_reports_queue_length() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue
            .enqueue(Job::new("m1", "r", "hi", "en", &["pl"]).unwrap())
            .await
            .unwrap();
        let metrics = Arc::new(PipelineMetrics::new());
        metrics.record_completed();

        let (status, Json(body)) = health(State(AppState { queue, metrics })).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
        assert_eq!(body.queue_length, Some(1));
        assert_eq!(body.metrics.jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_health_degraded_when_queue_unavailable() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue.close();

        let (status, Json(body)) = health(State(AppState {
            queue,
            metrics: Arc::new(PipelineMetrics::new()),
        }))
        .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "degraded");
        assert!(body.queue_length.is_none());
    }
}
