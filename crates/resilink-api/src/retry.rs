// Retry and timeout budget for a single logical request.
//
// Two presets exist: `native()` tolerates slow mobile networks with more
// retries and longer waits, `web()` keeps a browser tab from looking frozen.

use std::time::Duration;

/// Upper bound on the backoff exponent so the shift never overflows.
const MAX_BACKOFF_SHIFT: u32 = 20;

/// Immutable retry budget consumed by [`Fetcher`](crate::Fetcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    request_timeout: Duration,
    hard_timeout: Duration,
}

impl RetryPolicy {
    /// Build a policy from explicit values.
    ///
    /// `hard_timeout` is raised to at least `request_timeout * max_retries`
    /// so the ceiling never undercuts the natural retry schedule.
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        request_timeout: Duration,
        hard_timeout: Duration,
    ) -> Self {
        let natural = request_timeout.saturating_mul(max_retries.max(1));
        Self {
            max_retries,
            base_delay,
            request_timeout,
            hard_timeout: hard_timeout.max(natural),
        }
    }

    /// Native platforms: 3 retries, 1s base delay, 15s per attempt, 60s ceiling.
    pub fn native() -> Self {
        Self::new(
            3,
            Duration::from_millis(1_000),
            Duration::from_millis(15_000),
            Duration::from_millis(60_000),
        )
    }

    /// Web platform: 1 retry, 500ms base delay, 8s per attempt, 20s ceiling.
    pub fn web() -> Self {
        Self::new(
            1,
            Duration::from_millis(500),
            Duration::from_millis(8_000),
            Duration::from_millis(20_000),
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn hard_timeout(&self) -> Duration {
        self.hard_timeout
    }

    /// Backoff before retry number `attempt + 1`: `base_delay * 2^attempt`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = 1_u32 << attempt.min(MAX_BACKOFF_SHIFT);
        self.base_delay.saturating_mul(multiplier)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::native()
    }
}
