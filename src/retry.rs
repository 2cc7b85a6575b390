//! Generic retry executor driven by classified errors.
//!
//! Every remote call site goes through [`RetryExecutor::execute`]; call sites
//! differ only in the [`RetryConfig`] they pass.

use crate::classifier::{classify, RawFailure};
use crate::errors::AppError;
use crate::reporter::ErrorReporter;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a classified failure should be retried.
pub type RetryCondition = Arc<dyn Fn(&AppError) -> bool + Send + Sync>;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(BackoffStrategy::Fixed),
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy '{}'", other)),
        }
    }
}

/// Retry policy for one call site.
#[derive(Clone)]
pub struct RetryConfig {
    /// Total attempts including the first; always at least 1.
    pub max_attempts: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    pub backoff: BackoffStrategy,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Extra predicate; only consulted for errors classified as retryable.
    pub retry_condition: RetryCondition,
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_attempts", &self.max_attempts)
            .field("delay", &self.delay)
            .field("backoff", &self.backoff)
            .field("max_delay", &self.max_delay)
            .finish_non_exhaustive()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
            backoff: BackoffStrategy::Exponential,
            max_delay: Duration::from_secs(10),
            retry_condition: Arc::new(|err: &AppError| err.retryable),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration, backoff: BackoffStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff,
            ..Self::default()
        }
    }

    /// Policy for idempotent reads (campaign list, duplicate lookup).
    pub fn remote_read() -> Self {
        Self::default()
    }

    /// Policy for per-lead submissions: fewer attempts, slower growth.
    pub fn remote_write() -> Self {
        Self::new(2, Duration::from_secs(1), BackoffStrategy::Linear)
    }

    /// Single attempt; errors are still classified.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, BackoffStrategy::Fixed)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&AppError) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Arc::new(condition);
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::Linear => self.delay.saturating_mul(attempt),
            BackoffStrategy::Exponential => {
                // Cap the exponent so the multiplier cannot overflow
                let multiplier = 2u32.saturating_pow((attempt - 1).min(16));
                self.delay.saturating_mul(multiplier)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Runs operations with bounded retries and reports final failures.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    reporter: Option<ErrorReporter>,
}

impl RetryExecutor {
    pub fn new(reporter: ErrorReporter) -> Self {
        Self {
            reporter: Some(reporter),
        }
    }

    /// Executes `operation` under `config`.
    ///
    /// Each failure is classified. The operation is attempted again only
    /// while attempts remain, the error is retryable and the configured
    /// condition accepts it. The returned error is the last classified
    /// failure.
    ///
    /// # Arguments
    ///
    /// * `label` - Short name of the call site for logs.
    /// * `config` - Retry policy.
    /// * `operation` - Factory producing one attempt per call.
    pub async fn execute<T, E, F, Fut>(
        &self,
        label: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RawFailure>,
    {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(raw) => classify(raw.into()),
            };

            let should_retry =
                attempt < max_attempts && err.retryable && (config.retry_condition)(&err);

            if !should_retry {
                let err = err.with_context_entry("attempts", attempt.to_string());
                if let Some(reporter) = &self.reporter {
                    reporter.report(&err);
                }
                return Err(err);
            }

            let delay = config.delay_for(attempt);
            tracing::warn!(
                "{} failed (attempt {}/{}): {}. Retrying in {:?}",
                label,
                attempt,
                max_attempts,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
