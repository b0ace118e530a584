//! Per-source token-bucket rate limiting.
//!
//! Each source (portal) gets one shared limiter. Tokens accumulate at
//! `rate / period` up to `burst`; every outbound request spends one.
//! [`RateLimiter::acquire`] fails fast with the wait needed, while
//! [`RateLimiter::wait`] sleeps through the backoff for callers that
//! would rather block than propagate the error.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ReconError;

/// Configuration for a token-bucket limiter.
#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Tokens replenished per `period`.
    pub rate: f64,

    /// Replenishment period.
    pub period: Duration,

    /// Bucket capacity. Defaults to `rate` when not set.
    pub burst: Option<f64>,
}

impl RateLimiterConfig {
    pub fn new(rate: f64, period: Duration) -> Self {
        Self {
            rate,
            period,
            burst: None,
        }
    }

    pub fn with_burst(mut self, burst: f64) -> Self {
        self.burst = Some(burst);
        self
    }

    fn burst(&self) -> f64 {
        self.burst.unwrap_or(self.rate)
    }
}

impl Default for RateLimiterConfig {
    /// 60 requests per minute — a polite default for scraping targets.
    fn default() -> Self {
        Self::new(60.0, Duration::from_secs(60))
    }
}

#[derive(Debug)]
struct RateLimiterInner {
    allowance: f64,
    last_check: Instant,
}

/// Thread-safe token bucket. Cloning shares the underlying bucket, so
/// every task targeting the same source spends from one allowance.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    inner: Arc<Mutex<RateLimiterInner>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let allowance = config.burst();
        Self {
            config,
            inner: Arc::new(Mutex::new(RateLimiterInner {
                allowance,
                last_check: Instant::now(),
            })),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, RateLimiterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned rate limiter mutex");
            poisoned.into_inner()
        })
    }

    /// Refill rate in tokens per second. A degenerate config (zero
    /// rate, zero period) yields 0.0 — the bucket never refills —
    /// rather than a NaN/infinite rate that would poison the math.
    fn refill_per_sec(&self) -> f64 {
        let per_sec = self.config.rate / self.config.period.as_secs_f64();
        if per_sec.is_finite() && per_sec > 0.0 {
            per_sec
        } else {
            0.0
        }
    }

    /// Try to spend `tokens` from the bucket.
    ///
    /// Refills based on elapsed time first, then either spends the
    /// tokens or fails with [`ReconError::RateLimited`] carrying the
    /// time after which the same acquisition would succeed. A failed
    /// acquisition does not drain the bucket.
    pub fn acquire(&self, tokens: f64) -> Result<(), ReconError> {
        let mut inner = self.lock_inner();

        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_check).as_secs_f64();
        inner.last_check = now;

        let refill_per_sec = self.refill_per_sec();
        inner.allowance = (inner.allowance + elapsed * refill_per_sec).min(self.config.burst());

        if inner.allowance < tokens {
            // Never-refilling buckets report an effectively infinite
            // backoff instead of panicking on a non-finite duration.
            let retry_after = Duration::try_from_secs_f64(
                (tokens - inner.allowance) / refill_per_sec,
            )
            .unwrap_or(Duration::MAX);
            return Err(ReconError::RateLimited { retry_after });
        }

        inner.allowance -= tokens;
        Ok(())
    }

    /// Spend `tokens`, sleeping through rate-limit backoff as needed.
    ///
    /// This is the suspension point the coordinator uses before every
    /// scrape call. Under contention another task may win the refilled
    /// tokens, in which case the loop backs off again.
    pub async fn wait(&self, tokens: f64) -> Result<(), ReconError> {
        loop {
            match self.acquire(tokens) {
                Ok(()) => return Ok(()),
                Err(ReconError::RateLimited { retry_after }) => {
                    tracing::debug!(
                        wait_ms = %retry_after.as_millis(),
                        "Rate limited, backing off"
                    );
                    tokio::time::sleep(retry_after).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Current token count, after refill. Mainly for monitoring.
    pub fn allowance(&self) -> f64 {
        let mut inner = self.lock_inner();
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_check).as_secs_f64();
        inner.last_check = now;
        inner.allowance =
            (inner.allowance + elapsed * self.refill_per_sec()).min(self.config.burst());
        inner.allowance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_acquisitions_succeed() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(5.0, Duration::from_secs(1)));
        for _ in 0..5 {
            limiter.acquire(1.0).unwrap();
        }
    }

    #[test]
    fn test_exhausted_bucket_reports_retry_after() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(5.0, Duration::from_secs(1)));
        for _ in 0..5 {
            limiter.acquire(1.0).unwrap();
        }

        let err = limiter.acquire(1.0).unwrap_err();
        match err {
            ReconError::RateLimited { retry_after } => {
                // One token refills in ~0.2s at 5 tokens/s.
                assert!(retry_after <= Duration::from_millis(250));
                assert!(retry_after >= Duration::from_millis(100));
            }
            other => panic!("expected RateLimited, got {other}"),
        }
    }

    #[test]
    fn test_failed_acquire_does_not_drain() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2.0, Duration::from_secs(60)));
        limiter.acquire(2.0).unwrap();

        assert!(limiter.acquire(1.0).is_err());
        assert!(limiter.acquire(1.0).is_err());
        // Allowance stayed near zero rather than going negative.
        assert!(limiter.allowance() >= 0.0);
    }

    #[test]
    fn test_refill_after_elapsed_time() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(100.0, Duration::from_secs(1)));
        for _ in 0..100 {
            limiter.acquire(1.0).unwrap();
        }
        assert!(limiter.acquire(1.0).is_err());

        std::thread::sleep(Duration::from_millis(50));
        // ~5 tokens refilled in 50ms at 100 tokens/s.
        limiter.acquire(1.0).unwrap();
    }

    #[test]
    fn test_allowance_capped_at_burst() {
        let limiter =
            RateLimiter::new(RateLimiterConfig::new(1000.0, Duration::from_secs(1)).with_burst(3.0));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allowance() <= 3.0);

        limiter.acquire(3.0).unwrap();
        assert!(limiter.acquire(1.0).is_err());
    }

    #[tokio::test]
    async fn test_wait_backs_off_and_succeeds() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(20.0, Duration::from_secs(1)));
        for _ in 0..20 {
            limiter.acquire(1.0).unwrap();
        }

        let start = Instant::now();
        limiter.wait(1.0).await.unwrap();
        // Needed roughly one refill interval (50ms at 20/s).
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_degenerate_configs_fail_without_panicking() {
        // Zero rate: the bucket starts empty and never refills.
        let limiter = RateLimiter::new(RateLimiterConfig::new(0.0, Duration::from_secs(1)));
        match limiter.acquire(1.0).unwrap_err() {
            ReconError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::MAX);
            }
            other => panic!("expected RateLimited, got {other}"),
        }

        // Zero period: treated as no refill, the burst still spends.
        let limiter = RateLimiter::new(RateLimiterConfig::new(5.0, Duration::ZERO));
        for _ in 0..5 {
            limiter.acquire(1.0).unwrap();
        }
        assert!(limiter.acquire(1.0).is_err());
    }

    #[test]
    fn test_shared_bucket_across_clones() {
        let limiter = RateLimiter::new(RateLimiterConfig::new(2.0, Duration::from_secs(60)));
        let other = limiter.clone();

        limiter.acquire(1.0).unwrap();
        other.acquire(1.0).unwrap();
        assert!(limiter.acquire(1.0).is_err());
    }
}
