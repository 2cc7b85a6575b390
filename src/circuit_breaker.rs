use crate::classifier::RawFailure;
use crate::errors::{AppError, ErrorCategory, ErrorSeverity};
use failsafe::backoff::{self, Exponential};
use failsafe::failure_policy::{self, ConsecutiveFailures};
use failsafe::{Config, StateMachine};
use std::fmt;
use std::time::Duration;

/// Circuit breaker in front of the remote campaign service.
///
/// # Configuration
///
/// - **Failure threshold**: 5 consecutive unhealthy responses trigger OPEN state.
/// - **Backoff**: Exponential backoff from 10s to 60s before attempting recovery.
///
/// # States
///
/// - **CLOSED**: Normal operation, requests pass through.
/// - **OPEN**: Too many failures, requests fail fast without touching the network.
/// - **HALF_OPEN**: Testing if service recovered.
///
/// Only transport failures and 5xx responses count against the service.
/// Client errors (bad input, bad key, rate limit) say nothing about its health.
pub struct RemoteCircuitBreaker {
    inner: StateMachine<ConsecutiveFailures<Exponential>, ()>,
}

impl RemoteCircuitBreaker {
    pub fn new(failure_threshold: u32, min_backoff: Duration, max_backoff: Duration) -> Self {
        let backoff_strategy = backoff::exponential(min_backoff, max_backoff);
        let failure_policy =
            failure_policy::consecutive_failures(failure_threshold.max(1), backoff_strategy);

        Self {
            inner: Config::new().failure_policy(failure_policy).build(),
        }
    }

    /// Defaults used for the campaign service.
    pub fn for_campaign_service() -> Self {
        Self::new(5, Duration::from_secs(10), Duration::from_secs(60))
    }

    /// Fails fast with a non-retryable remote error while the circuit is open.
    pub fn check(&self) -> Result<(), RawFailure> {
        if self.inner.is_call_permitted() {
            Ok(())
        } else {
            tracing::warn!("Campaign service circuit is open, rejecting call");
            Err(RawFailure::Classified(
                AppError::new(
                    "Campaign service is temporarily unavailable",
                    ErrorCategory::Remote,
                    ErrorSeverity::High,
                    false,
                )
                .with_code("CIRCUIT_OPEN"),
            ))
        }
    }

    /// Feeds the outcome of one remote call into the breaker.
    pub fn record<T>(&self, outcome: &Result<T, RawFailure>) {
        match outcome {
            Err(failure) if Self::is_unhealthy(failure) => self.inner.on_error(),
            _ => self.inner.on_success(),
        }
    }

    fn is_unhealthy(failure: &RawFailure) -> bool {
        match failure {
            RawFailure::Network { .. } => true,
            RawFailure::Response { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Debug for RemoteCircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCircuitBreaker")
            .field("call_permitted", &self.inner.is_call_permitted())
            .finish()
    }
}
