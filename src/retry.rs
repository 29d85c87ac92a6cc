//! Transport-level retry for calls to the external translation API.
//!
//! Independent of the job-level retry in the worker pool: this one absorbs short
//! network blips inside a single job attempt, so it uses few attempts and short waits.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total tries, the first one included. Zero behaves like one.
    pub max_attempts: u32,
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single wait
    pub max_delay: Duration,
    /// Growth factor applied to the wait after each retry
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// 3 attempts, waits of 250ms then 500ms.
    pub fn transport() -> Self {
        Self::new(3, Duration::from_millis(250))
    }

    /// Single attempt; failures go straight to the job-level retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait before retry number `retry` (1-based).
    fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            self.max_delay
        } else {
            Duration::from_nanos(nanos.max(0.0) as u64)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::transport()
    }
}

/// Run `operation` until it succeeds, fails with an error `should_retry` rejects, or
/// runs out of attempts. The last error is returned as is.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    label: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", label, attempt, attempts);
                }
                return Ok(value);
            }
            Err(e) if !should_retry(&e) => {
                debug!("{} failed with a non-retryable error: {}", label, e);
                return Err(e);
            }
            Err(e) if attempt >= attempts => {
                if attempts > 1 {
                    warn!("{} giving up after {} attempts: {}", label, attempts, e);
                }
                return Err(e);
            }
            Err(e) => {
                let wait = config.backoff(attempt);
                warn!(
                    "{} attempt {}/{} failed ({}), retrying in {:?}",
                    label, attempt, attempts, e, wait
                );
                sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
