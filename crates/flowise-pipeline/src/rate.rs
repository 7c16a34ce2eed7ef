use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Minimum spacing between Flowise calls derived from a per-minute limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimiter {
    per_minute: u32,
}

impl RateLimiter {
    /// Creates a limiter. A limit of `0` disables throttling.
    pub fn per_minute(per_minute: u32) -> Self {
        Self { per_minute }
    }

    /// Time to wait given how long the request has been running.
    pub fn delay(&self, elapsed: Duration) -> Duration {
        if self.per_minute == 0 {
            return Duration::ZERO;
        }
        let interval = Duration::from_secs(60) / self.per_minute;
        interval.saturating_sub(elapsed)
    }

    /// Sleeps for the remaining delay, once, before the transport call.
    ///
    /// Returns `true` when a sleep happened.
    pub async fn throttle(&self, started: Instant) -> bool {
        let delay = self.delay(started.elapsed());
        if delay.is_zero() {
            return false;
        }
        info!(sleep_secs = delay.as_secs_f64(), "rate limit active");
        tokio::time::sleep(delay).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn five_per_minute_waits_twelve_seconds_at_start() {
        let limiter = RateLimiter::per_minute(5);
        assert_eq!(limiter.delay(Duration::ZERO), Duration::from_secs(12));
        assert_eq!(limiter.delay(Duration::from_secs(4)), Duration::from_secs(8));
    }

    #[test]
    fn no_wait_once_interval_has_elapsed() {
        let limiter = RateLimiter::per_minute(5);
        assert_eq!(limiter.delay(Duration::from_secs(12)), Duration::ZERO);
        assert_eq!(limiter.delay(Duration::from_secs(90)), Duration::ZERO);
    }

    #[test]
    fn zero_limit_disables_throttling() {
        assert_eq!(
            RateLimiter::per_minute(0).delay(Duration::ZERO),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_sleeps_for_remaining_interval() {
        let started = Instant::now();
        let limiter = RateLimiter::per_minute(60);
        assert!(limiter.throttle(started).await);
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert!(!limiter.throttle(started).await);
    }
}
