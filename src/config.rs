use anyhow::{bail, Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    // Master switch
    pub enabled: bool,

    // Queue
    pub queue_name: String,
    pub redis_url: Option<String>,
    pub poll_interval_ms: u64,

    // Workers
    pub max_concurrent_jobs: usize,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub job_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,

    // Translation API
    pub api_url: String,
    pub api_key: Option<String>,
    pub api_timeout_seconds: u64,

    // Cache
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,

    // Health server
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_name: "translation:jobs".to_string(),
            redis_url: None,
            poll_interval_ms: 1000,
            max_concurrent_jobs: 5,
            max_retries: 3,
            retry_delay_seconds: 5,
            job_timeout_seconds: 30,
            shutdown_grace_seconds: 30,
            api_url: "http://localhost:5000/translate".to_string(),
            api_key: None,
            api_timeout_seconds: 10,
            cache_ttl_seconds: 86_400,
            cache_capacity: 1024,
            port: 8080,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            enabled: parse_bool("TRANSLATION_ENABLED", defaults.enabled)?,

            queue_name: std::env::var("TRANSLATION_QUEUE_NAME").unwrap_or(defaults.queue_name),
            redis_url: non_empty_var("REDIS_URL"),
            poll_interval_ms: parse_or("TRANSLATION_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,

            max_concurrent_jobs: parse_or(
                "TRANSLATION_MAX_CONCURRENT_JOBS",
                defaults.max_concurrent_jobs,
            )?,
            max_retries: parse_or("TRANSLATION_MAX_RETRIES", defaults.max_retries)?,
            retry_delay_seconds: parse_or(
                "TRANSLATION_RETRY_DELAY_SECONDS",
                defaults.retry_delay_seconds,
            )?,
            job_timeout_seconds: parse_or(
                "TRANSLATION_JOB_TIMEOUT_SECONDS",
                defaults.job_timeout_seconds,
            )?,
            shutdown_grace_seconds: parse_or(
                "TRANSLATION_SHUTDOWN_GRACE_SECONDS",
                defaults.shutdown_grace_seconds,
            )?,

            api_url: std::env::var("TRANSLATION_API_URL").unwrap_or(defaults.api_url),
            // Absent key is not fatal here: jobs fail as a configuration error instead
            api_key: non_empty_var("TRANSLATION_API_KEY"),
            api_timeout_seconds: parse_or(
                "TRANSLATION_API_TIMEOUT_SECONDS",
                defaults.api_timeout_seconds,
            )?,

            cache_ttl_seconds: parse_or("TRANSLATION_CACHE_TTL_SECONDS", defaults.cache_ttl_seconds)?,
            cache_capacity: parse_or("TRANSLATION_CACHE_CAPACITY", defaults.cache_capacity)?,

            port: parse_or("PORT", defaults.port)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_concurrent_jobs == 0 {
            bail!("TRANSLATION_MAX_CONCURRENT_JOBS must be at least 1");
        }
        if self.job_timeout_seconds == 0 {
            bail!("TRANSLATION_JOB_TIMEOUT_SECONDS must be at least 1");
        }
        if self.cache_capacity == 0 {
            bail!("TRANSLATION_CACHE_CAPACITY must be at least 1");
        }
        if self.queue_name.trim().is_empty() {
            bail!("TRANSLATION_QUEUE_NAME must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match non_empty_var(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        None => Ok(default),
    }
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    match non_empty_var(name).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => bail!("{} must be a boolean, got: {}", name, other),
        },
    }
}
