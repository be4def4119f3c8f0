//! Exponential-backoff retry envelopes
//!
//! Two variants: `retry` raises the last error after exhaustion, while
//! `retry_graceful` swallows it and returns a caller-supplied default so
//! non-critical paths keep the system running.

use std::future::Future;
use std::time::Duration;

/// Backoff configuration for a retried operation.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Profile for LLM completions: long waits, strict envelope.
    pub fn llm() -> Self {
        Self {
            max_retries: 6,
            initial_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(600),
        }
    }

    /// Profile for search backends: quick retries, graceful envelope.
    pub fn search_api() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 1.6,
            max_delay: Duration::from_secs(25),
        }
    }

    /// Profile for database reads.
    pub fn db() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(10),
        }
    }

    /// Delay before retry `attempt` (0-based): `initial * factor^attempt`,
    /// capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// Strict retry: re-runs `op` with exponential backoff while `is_retryable`
/// classifies the error as transient, and propagates the final error once
/// retries are exhausted. Fatal errors short-circuit immediately.
pub async fn retry<T, E, F, Fut, C>(
    config: &RetryConfig,
    label: &str,
    is_retryable: C,
    mut op: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt + 1);
                }
                return Ok(value);
            }
            Err(err) if attempt == config.max_retries => {
                tracing::error!(
                    "{} still failing after {} attempts: {}",
                    label,
                    config.max_retries + 1,
                    err
                );
                return Err(err);
            }
            Err(err) if !is_retryable(&err) => {
                tracing::error!("{} hit non-retryable error: {}", label, err);
                return Err(err);
            }
            Err(err) => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} attempt {} failed: {} (retrying in {:.1}s)",
                    label,
                    attempt + 1,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    unreachable!("retry loop covers all attempts")
}

/// Graceful retry: same backoff schedule, but exhaustion or a fatal error
/// yields `default` instead of propagating.
pub async fn retry_graceful<T, E, F, Fut, C>(
    config: &RetryConfig,
    label: &str,
    default: T,
    is_retryable: C,
    mut op: F,
) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
{
    for attempt in 0..=config.max_retries {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("{} succeeded on attempt {}", label, attempt + 1);
                }
                return value;
            }
            Err(err) if attempt == config.max_retries => {
                tracing::warn!(
                    "{} still failing after {} attempts: {} (returning default)",
                    label,
                    config.max_retries + 1,
                    err
                );
                return default;
            }
            Err(err) if !is_retryable(&err) => {
                tracing::warn!(
                    "{} hit non-retryable error: {} (returning default)",
                    label,
                    err
                );
                return default;
            }
            Err(err) => {
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} attempt {} failed: {} (retrying in {:.1}s)",
                    label,
                    attempt + 1,
                    err,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
    default
}
