use anyhow::{Context, Result};
use chat_translate_queue::adapters::{InMemoryMessageStore, TracingNotifier};
use chat_translate_queue::config::Config;
use chat_translate_queue::metrics::PipelineMetrics;
use chat_translate_queue::provider::{
    HttpTranslationApi, MemoryCache, RedisCache, TranslationCache, TranslationProvider,
};
use chat_translate_queue::queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
use chat_translate_queue::server::{self, AppState};
use chat_translate_queue::worker::{WorkerConfig, WorkerPool};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chat_translate_queue=info".parse()?),
        )
        .init();

    info!("Starting translation worker");

    let config = Config::from_env()?;
    if !config.enabled {
        info!("Translation is disabled (TRANSLATION_ENABLED=false), exiting");
        return Ok(());
    }

    let (queue, cache) = build_backends(&config).await?;

    if config.api_key.is_none() {
        warn!("TRANSLATION_API_KEY is not set, every job will fail with MISSING_CREDENTIALS");
    }
    let api = HttpTranslationApi::new(
        config.api_url.clone(),
        config.api_key.clone(),
        config.api_timeout(),
    )
    .context("Failed to build translation API client")?;

    let metrics = Arc::new(PipelineMetrics::new());
    let provider = Arc::new(TranslationProvider::new(
        Arc::new(api),
        cache,
        config.cache_ttl(),
        metrics.clone(),
    ));

    // Reference adapters; embedders supply their own store and chat transport
    let pool = WorkerPool::new(
        WorkerConfig::from_config(&config),
        queue.clone(),
        provider,
        Arc::new(InMemoryMessageStore::new()),
        Arc::new(TracingNotifier),
        metrics.clone(),
    );

    let shutdown = CancellationToken::new();
    let worker = {
        let pool = pool.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { pool.run(token).await })
    };

    let signal_token = shutdown.clone();
    let served = server::serve(AppState { queue, metrics }, config.port, async move {
        wait_for_signal().await;
        signal_token.cancel();
    })
    .await;

    // Also reached when the server fails on its own
    shutdown.cancel();
    let report = worker.await.context("Worker pool task failed")?;
    if !report.lost.is_empty() {
        warn!("{} jobs were lost on shutdown", report.lost.len());
    }

    served?;
    info!("Translation worker stopped");
    Ok(())
}

async fn build_backends(config: &Config) -> Result<(Arc<dyn JobQueue>, Arc<dyn TranslationCache>)> {
    match &config.redis_url {
        Some(url) => {
            // Separate connections: BRPOP holds its connection while waiting
            let queue = RedisJobQueue::connect(url, &config.queue_name)
                .await
                .context("Failed to connect the Redis job queue")?;

            let client = redis::Client::open(url.as_str()).context("Invalid REDIS_URL")?;
            let cache_conn = redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect the Redis cache")?;

            info!("Using Redis queue '{}'", config.queue_name);
            let queue: Arc<dyn JobQueue> = Arc::new(queue);
            let cache: Arc<dyn TranslationCache> = Arc::new(RedisCache::new(
                cache_conn,
                format!("{}:cache", config.queue_name),
            ));
            Ok((queue, cache))
        }
        None => {
            warn!("REDIS_URL not set, using an in-process queue (single dispatcher only)");
            let capacity = NonZeroUsize::new(config.cache_capacity)
                .context("TRANSLATION_CACHE_CAPACITY must be at least 1")?;
            let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new());
            let cache: Arc<dyn TranslationCache> = Arc::new(MemoryCache::new(capacity));
            Ok((queue, cache))
        }
    }
}

async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            // Keep serving rather than shutting down immediately
            std::future::pending::<()>().await;
        }
    }
}
