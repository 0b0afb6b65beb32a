//! Permit sources that bound how often the journal thread may sync.

use std::time::{Duration, Instant};

/// Issues permits at a bounded rate. `acquire` blocks until one is available.
pub trait RateSource: Send {
    fn acquire(&mut self);
}

/// Grants every permit immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unlimited;

impl RateSource for Unlimited {
    fn acquire(&mut self) {}
}

/// Evenly spaced permits: at most `permits_per_sec` per second.
///
/// Permits are scheduled one interval apart. A caller that shows up late gets
/// its permit immediately but the schedule restarts from now, so idle time
/// never accumulates into a burst.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_permit: Option<Instant>,
}

impl RateLimiter {
    /// `permits_per_sec` must be non-zero; use `Unlimited` for no throttling.
    pub fn new(permits_per_sec: u32) -> Self {
        let per_sec = permits_per_sec.max(1);
        Self {
            interval: Duration::from_secs(1) / per_sec,
            next_permit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Reserve the next permit as of `now`, returning how long the caller must wait.
    fn reserve(&mut self, now: Instant) -> Duration {
        match self.next_permit {
            Some(at) if at > now => {
                self.next_permit = Some(at + self.interval);
                at - now
            }
            _ => {
                self.next_permit = Some(now + self.interval);
                Duration::ZERO
            }
        }
    }
}

impl RateSource for RateLimiter {
    fn acquire(&mut self) {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }
}

/// Build the rate source for a configured sync rate; 0 means unthrottled.
pub fn for_rate(permits_per_sec: u32) -> Box<dyn RateSource> {
    if permits_per_sec == 0 {
        Box::new(Unlimited)
    } else {
        Box::new(RateLimiter::new(permits_per_sec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rate() {
        assert_eq!(RateLimiter::new(10_000).interval(), Duration::from_micros(100));
        assert_eq!(RateLimiter::new(4).interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_first_permit_is_immediate() {
        let mut limiter = RateLimiter::new(10);
        assert_eq!(limiter.reserve(Instant::now()), Duration::ZERO);
    }

    #[test]
    fn test_back_to_back_permits_are_spaced() {
        let mut limiter = RateLimiter::new(10);
        let now = Instant::now();
        assert_eq!(limiter.reserve(now), Duration::ZERO);
        assert_eq!(limiter.reserve(now), Duration::from_millis(100));
        assert_eq!(limiter.reserve(now), Duration::from_millis(200));
    }

    #[test]
    fn test_idle_time_does_not_build_a_burst() {
        let mut limiter = RateLimiter::new(10);
        let start = Instant::now();
        limiter.reserve(start);
        let later = start + Duration::from_secs(5);
        assert_eq!(limiter.reserve(later), Duration::ZERO);
        assert_eq!(limiter.reserve(later), Duration::from_millis(100));
    }

    #[test]
    fn test_acquire_blocks_for_rate() {
        let mut limiter = RateLimiter::new(20);
        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire();
        }
        // permits at 0ms, 50ms, 100ms
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_zero_rate_is_unlimited() {
        let mut source = for_rate(0);
        let start = Instant::now();
        for _ in 0..1000 {
            source.acquire();
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
