//! Retry policy with exponential backoff.
//!
//! # Retry Policy
//!
//! - Attempts: 3 total (initial call plus 2 retries)
//! - Backoff: `min(max_delay, min_delay * 2^(attempt - 1))`, 1s then 2s by default
//! - Max delay: 10 seconds
//! - Jitter: optional down-jitter (multiplier in `[1 - jitter_factor, 1.0]`), off by default
//!
//! # Retryable Conditions
//!
//! - No HTTP response (connection error, timeout)
//! - HTTP 429 and 5xx
//!
//! Every other status is terminal. A server `Retry-After` hint replaces the
//! computed backoff; a hint longer than `max_retry_after` stops retrying so
//! the caller sees the hint instead of a stalled batch slot.
//!
//! Retries happen only here, around a single call. The batch executor never
//! retries, so attempt counts do not compound across layers.

use std::future::Future;
use std::time::Duration;

use fanout_types::DomainError;

/// Retry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts, including the first. At least 1.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Upper bound for computed backoff.
    pub max_delay: Duration,
    /// Jitter factor for down-jitter (0.25 = up to 25% reduction).
    pub jitter_factor: f64,
    /// Longest server-requested wait that will be honored.
    pub max_retry_after: Duration,
}

impl RetryConfig {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(1000);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
    pub const DEFAULT_MAX_RETRY_AFTER: Duration = Duration::from_secs(60);
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
            min_delay: Self::DEFAULT_MIN_DELAY,
            max_delay: Self::DEFAULT_MAX_DELAY,
            jitter_factor: 0.0,
            max_retry_after: Self::DEFAULT_MAX_RETRY_AFTER,
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

impl RetryDecision {
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    #[must_use]
    pub const fn delay(&self) -> Option<Duration> {
        match self {
            Self::Retry { delay } => Some(*delay),
            Self::Stop => None,
        }
    }
}

/// Selected at construction; `Never` makes every call single-shot.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    Exponential(RetryConfig),
    Never,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential(RetryConfig::default())
    }
}

impl RetryStrategy {
    /// Decide whether attempt number `attempt` (1-based) should be followed by another.
    #[must_use]
    pub fn decide(&self, attempt: u32, error: &DomainError) -> RetryDecision {
        let config = match self {
            Self::Exponential(config) => config,
            Self::Never => return RetryDecision::Stop,
        };

        if attempt >= config.max_attempts || !is_retryable(error) {
            return RetryDecision::Stop;
        }

        if let Some(seconds) = error.retry_after_seconds() {
            let hinted = Duration::from_secs(seconds);
            if hinted > config.max_retry_after {
                return RetryDecision::Stop;
            }
            return RetryDecision::Retry { delay: hinted };
        }

        let delay = apply_jitter(backoff_delay(attempt, config), config.jitter_factor);
        RetryDecision::Retry { delay }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::Exponential(config) => config.max_attempts.max(1),
            Self::Never => 1,
        }
    }
}

/// Transport failures, 429 and 5xx are worth another attempt.
#[must_use]
pub fn is_retryable(error: &DomainError) -> bool {
    match error.status_code() {
        None => error.is_transport(),
        Some(status) => status == 429 || (500..600).contains(&status),
    }
}

/// Exponential backoff before the retry that follows attempt `attempt`.
#[must_use]
pub fn backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let factor = 2u32
        .checked_pow(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    config
        .min_delay
        .checked_mul(factor)
        .unwrap_or(Duration::MAX)
        .min(config.max_delay)
}

fn apply_jitter(delay: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return delay;
    }
    let jitter = 1.0 - rand::random::<f64>() * jitter_factor.min(1.0);
    delay.mul_f64(jitter)
}

/// Run `attempt_fn` until it succeeds or the strategy says stop.
///
/// `attempt_fn` receives the 1-based attempt number. The error of the last
/// attempt is returned as-is.
pub async fn run_with_retry<T, F, Fut>(
    strategy: &RetryStrategy,
    label: &str,
    mut attempt_fn: F,
) -> Result<T, DomainError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut attempt = 1;
    loop {
        let error = match attempt_fn(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        match strategy.decide(attempt, &error) {
            RetryDecision::Retry { delay } => {
                tracing::debug!(
                    label,
                    status = ?error.status_code(),
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "Retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            RetryDecision::Stop => {
                if is_retryable(&error) {
                    tracing::warn!(
                        label,
                        status = ?error.status_code(),
                        attempts = attempt,
                        error = %error,
                        "Request failed after retries"
                    );
                } else {
                    tracing::debug!(
                        label,
                        status = ?error.status_code(),
                        error = %error,
                        "Request failed with terminal error"
                    );
                }
                return Err(error);
            }
        }
    }
}
