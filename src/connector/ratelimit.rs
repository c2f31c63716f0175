//! Client-side request pacing
//!
//! A leaky bucket without slack: calls are spaced at least `1 / rate` apart,
//! and idle time is never banked for a later burst.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Requests per second allowed for each connector
pub const DEFAULT_RATE_PER_SECOND: u32 = 10;

pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn per_second(rate: u32) -> Self {
        let rate = rate.max(1);
        Self {
            interval: Duration::from_secs(1) / rate,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until the next request may be sent
    pub async fn take(&self) {
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();

        let slot = match *next_slot {
            Some(slot) if slot > now => {
                tokio::time::sleep_until(slot).await;
                slot
            }
            _ => now,
        };

        *next_slot = Some(slot + self.interval);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::per_second(DEFAULT_RATE_PER_SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let limiter = RateLimiter::per_second(50);
        let start = Instant::now();

        for _ in 0..4 {
            limiter.take().await;
        }

        // first call is free, the next three wait 20ms each
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_idle_time_is_not_banked() {
        let limiter = RateLimiter::per_second(50);
        limiter.take().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        limiter.take().await;
        limiter.take().await;
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
