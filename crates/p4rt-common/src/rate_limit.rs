//! Token bucket limiter for repetitive log lines.
//!
//! Lines that would repeat on every poll iteration (ignored ports,
//! failing backend runs) go through a shared [`LogRateLimiter`]. Lines
//! dropped by the limiter are counted so the next emitted line can report
//! how many were suppressed.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Rate limit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Sustained lines per second.
    pub per_second: u32,
    /// Lines allowed in a burst.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 1,
            burst: 5,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    suppressed: u64,
}

/// Shared token bucket for log throttling.
#[derive(Debug)]
pub struct LogRateLimiter {
    config: RateLimitConfig,
    bucket: Mutex<Bucket>,
}

impl LogRateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            bucket: Mutex::new(Bucket {
                tokens: f64::from(config.burst),
                last_refill: Instant::now(),
                suppressed: 0,
            }),
        }
    }

    /// Returns the configured parameters.
    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    /// Consumes one token; returns false if the line should be dropped.
    pub fn check(&self) -> bool {
        self.admit().is_some()
    }

    /// Consumes one token.
    ///
    /// Returns the number of lines suppressed since the last admitted one,
    /// or `None` if this line should be dropped.
    pub fn admit(&self) -> Option<u64> {
        self.admit_at(Instant::now())
    }

    /// Total lines dropped since the last admitted one.
    pub fn suppressed(&self) -> u64 {
        self.bucket.lock().suppressed
    }

    fn admit_at(&self, now: Instant) -> Option<u64> {
        let mut bucket = self.bucket.lock();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * f64::from(self.config.per_second))
            .min(f64::from(self.config.burst));
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Some(std::mem::take(&mut bucket.suppressed))
        } else {
            bucket.suppressed += 1;
            None
        }
    }

    /// Time until the next token is available.
    pub fn retry_after(&self) -> Duration {
        let bucket = self.bucket.lock();
        if bucket.tokens >= 1.0 || self.config.per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((1.0 - bucket.tokens) / f64::from(self.config.per_second))
    }
}

impl Default for LogRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_burst_then_suppress() {
        let limiter = LogRateLimiter::new(RateLimitConfig {
            per_second: 1,
            burst: 3,
        });
        let now = Instant::now();

        assert_eq!(limiter.admit_at(now), Some(0));
        assert_eq!(limiter.admit_at(now), Some(0));
        assert_eq!(limiter.admit_at(now), Some(0));
        assert_eq!(limiter.admit_at(now), None);
        assert_eq!(limiter.admit_at(now), None);
        assert_eq!(limiter.suppressed(), 2);
    }

    #[test]
    fn test_refill_reports_suppressed() {
        let limiter = LogRateLimiter::new(RateLimitConfig {
            per_second: 1,
            burst: 1,
        });
        let now = Instant::now();

        assert_eq!(limiter.admit_at(now), Some(0));
        assert_eq!(limiter.admit_at(now), None);
        assert_eq!(limiter.admit_at(now + Duration::from_secs(2)), Some(1));
        assert_eq!(limiter.suppressed(), 0);
    }

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.per_second, 1);
        assert_eq!(config.burst, 5);
        assert!(LogRateLimiter::default().check());
    }
}
