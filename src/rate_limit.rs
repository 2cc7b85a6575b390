use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Snapshot of the caller's allowance in the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaInfo {
    pub request_count: u32,
    pub remaining_requests: u32,
    pub max_requests_per_window: u32,
    pub window_secs: u64,
}

#[derive(Debug)]
struct WindowState {
    started: Instant,
    count: u32,
}

/// Counts remote calls per fixed window.
///
/// Purely observational: it never delays or refuses a call. Windows are
/// aligned to the tracker's creation time and a new window starts from zero.
#[derive(Debug)]
pub struct RateLimitTracker {
    window: Duration,
    max_requests: u32,
    state: Mutex<WindowState>,
}

impl RateLimitTracker {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            max_requests,
            state: Mutex::new(WindowState {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Records one remote call in the current window.
    pub fn record_call(&self) {
        self.with_state(|state| {
            state.count = state.count.saturating_add(1);
        });
    }

    pub fn quota(&self) -> QuotaInfo {
        let count = self.with_state(|state| state.count);
        QuotaInfo {
            request_count: count,
            remaining_requests: self.max_requests.saturating_sub(count),
            max_requests_per_window: self.max_requests,
            window_secs: self.window.as_secs(),
        }
    }

    /// True when the current window has no allowance left.
    pub fn is_exhausted(&self) -> bool {
        self.quota().remaining_requests == 0
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut WindowState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.roll_window(&mut state);
        f(&mut state)
    }

    fn roll_window(&self, state: &mut WindowState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.started);
        if elapsed < self.window {
            return;
        }
        // Start of the window containing `now`; always within one window of it
        let into_window = elapsed.as_nanos() % self.window.as_nanos();
        state.started = now - Duration::from_nanos(u64::try_from(into_window).unwrap_or(u64::MAX));
        if state.count > 0 {
            tracing::debug!(
                "Rate limit window rolled over ({} calls in previous window)",
                state.count
            );
        }
        state.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_calls() {
        let tracker = RateLimitTracker::new(Duration::from_secs(60), 10);
        for _ in 0..3 {
            tracker.record_call();
        }

        let quota = tracker.quota();
        assert_eq!(quota.request_count, 3);
        assert_eq!(quota.remaining_requests, 7);
        assert_eq!(quota.max_requests_per_window, 10);
        assert_eq!(quota.window_secs, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_never_negative() {
        let tracker = RateLimitTracker::new(Duration::from_secs(60), 2);
        for _ in 0..5 {
            tracker.record_call();
        }

        let quota = tracker.quota();
        assert_eq!(quota.request_count, 5);
        assert_eq!(quota.remaining_requests, 0);
        assert!(tracker.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_rollover_resets() {
        let tracker = RateLimitTracker::new(Duration::from_secs(60), 10);
        tracker.record_call();
        tracker.record_call();

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(tracker.quota().request_count, 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(tracker.quota().request_count, 0);

        // Alignment: the new window began at t=60s, so t=119s is still inside it
        tracker.record_call();
        tokio::time::advance(Duration::from_secs(58)).await;
        assert_eq!(tracker.quota().request_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rollover_after_many_tiny_windows() {
        let tracker = RateLimitTracker::new(Duration::from_millis(1), 10);

        // Far more than u32::MAX windows elapse
        tokio::time::advance(Duration::from_secs(60 * 60 * 24 * 60)).await;
        tracker.record_call();
        assert_eq!(tracker.quota().request_count, 1);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(tracker.quota().request_count, 0);
    }
}
