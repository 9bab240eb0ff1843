//! Byte rate limiting for a single transfer.
//!
//! All byte ranges of one file share a [`BandwidthThrottle`], so the cap
//! applies to the file as a whole regardless of how many ranges are in
//! flight.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// How far the limiter may fall behind before it forgets the debt.
const MAX_LAG: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct Budget {
    /// Start of the current accounting period.
    since: Instant,
    /// Bytes consumed in the current period.
    consumed: u64,
}

/// Paces consumers to at most `bytes_per_second`.
#[derive(Debug)]
pub struct BandwidthThrottle {
    bytes_per_second: u64,
    budget: Mutex<Budget>,
}

impl BandwidthThrottle {
    /// Create a throttle for the given rate (minimum 1 byte/s).
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: bytes_per_second.max(1),
            budget: Mutex::new(Budget {
                since: Instant::now(),
                consumed: 0,
            }),
        }
    }

    /// The configured rate.
    pub fn bytes_per_second(&self) -> u64 {
        self.bytes_per_second
    }

    /// Account for `bytes` and return how long the caller must wait.
    pub fn reserve(&self, bytes: u64) -> Duration {
        self.reserve_at(bytes, Instant::now())
    }

    fn reserve_at(&self, bytes: u64, now: Instant) -> Duration {
        let mut budget = self.budget.lock();

        let elapsed = now.saturating_duration_since(budget.since);
        let allowed_elapsed =
            Duration::from_secs_f64(budget.consumed as f64 / self.bytes_per_second as f64);

        // Idle long enough that the old allowance no longer matters.
        if elapsed > allowed_elapsed + MAX_LAG {
            budget.since = now;
            budget.consumed = 0;
        }

        budget.consumed += bytes;
        let due = budget.since
            + Duration::from_secs_f64(budget.consumed as f64 / self.bytes_per_second as f64);

        due.saturating_duration_since(now)
    }

    /// Account for `bytes`, sleeping if the rate is exceeded.
    pub async fn consume(&self, bytes: u64) {
        let wait = self.reserve(bytes);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_rate_no_wait() {
        let throttle = BandwidthThrottle::new(1000);
        let start = Instant::now();
        throttle.budget.lock().since = start;

        // 100 bytes after 200ms is well under 1000 B/s.
        let wait = throttle.reserve_at(100, start + Duration::from_millis(200));
        assert!(wait.is_zero());
    }

    #[test]
    fn test_over_rate_waits() {
        let throttle = BandwidthThrottle::new(1000);
        let start = Instant::now();
        throttle.budget.lock().since = start;

        let wait = throttle.reserve_at(2000, start);
        assert_eq!(wait, Duration::from_secs(2));
    }

    #[test]
    fn test_waits_accumulate() {
        let throttle = BandwidthThrottle::new(1000);
        let start = Instant::now();
        throttle.budget.lock().since = start;

        assert_eq!(throttle.reserve_at(500, start), Duration::from_millis(500));
        assert_eq!(throttle.reserve_at(500, start), Duration::from_secs(1));
    }

    #[test]
    fn test_idle_resets_budget() {
        let throttle = BandwidthThrottle::new(1000);
        let start = Instant::now();
        throttle.budget.lock().since = start;

        throttle.reserve_at(100, start);
        // Long idle: a new burst is measured from now, not from `start`.
        let later = start + Duration::from_secs(10);
        assert_eq!(throttle.reserve_at(1000, later), Duration::from_secs(1));
    }

    #[test]
    fn test_minimum_rate() {
        assert_eq!(BandwidthThrottle::new(0).bytes_per_second(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_consume_sleeps() {
        let throttle = BandwidthThrottle::new(1000);
        let before = tokio::time::Instant::now();
        throttle.consume(500).await;
        assert!(tokio::time::Instant::now() - before >= Duration::from_millis(400));
    }
}
