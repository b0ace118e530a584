use std::collections::HashMap;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::rate_limiter::RateLimiterConfig;

/// Per-source limits: rate-limiter and circuit-breaker settings for one
/// portal.
#[derive(Debug, Clone)]
pub struct SourceLimits {
    pub rate_limiter: RateLimiterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for SourceLimits {
    fn default() -> Self {
        Self {
            rate_limiter: RateLimiterConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl SourceLimits {
    /// Requests per minute, keeping the breaker defaults.
    pub fn per_minute(rate: f64) -> Self {
        Self {
            rate_limiter: RateLimiterConfig::new(rate, Duration::from_secs(60)),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }
}

/// Configuration for the RECON coordinator and its queue.
#[derive(Debug, Clone)]
pub struct ReconConfig {
    /// Worker slots draining the queue.
    pub max_concurrent_tasks: usize,

    /// Capacity of each auto-created task batch.
    pub batch_size: usize,

    /// TTL for cached scrape results (same template + filters within
    /// the window skips the source entirely).
    pub cache_ttl: Duration,

    /// TTL for the completed-results cache consulted by status queries
    /// after a task has been swept from the live queue.
    pub result_ttl: Duration,

    /// Age after which terminal tasks and completed batches are swept
    /// out of the queue's in-memory maps.
    pub task_retention: Duration,

    /// How often the sweeper runs.
    pub sweep_interval: Duration,

    /// Wall-clock budget for one task's full pipeline. `None` disables
    /// the timeout (a stuck source call then occupies a worker slot
    /// indefinitely).
    pub task_timeout: Option<Duration>,

    /// Limits applied to sources without an explicit override.
    pub default_limits: SourceLimits,

    /// Per-source overrides, keyed by source name.
    pub source_limits: HashMap<String, SourceLimits>,
}

impl Default for ReconConfig {
    fn default() -> Self {
        // Per-portal request budgets tuned against the real portals;
        // anything unlisted falls back to `default_limits` (60/min).
        let source_limits = HashMap::from([
            ("comprar".to_string(), SourceLimits::per_minute(100.0)),
            ("contratar".to_string(), SourceLimits::per_minute(120.0)),
            ("bac".to_string(), SourceLimits::per_minute(80.0)),
            (
                "comprar_mendoza".to_string(),
                SourceLimits::per_minute(60.0),
            ),
            (
                "compras_mendoza".to_string(),
                SourceLimits::per_minute(60.0),
            ),
        ]);

        Self {
            max_concurrent_tasks: 3,
            batch_size: 5,
            cache_ttl: Duration::from_secs(3600),
            result_ttl: Duration::from_secs(24 * 3600),
            task_retention: Duration::from_secs(24 * 3600),
            sweep_interval: Duration::from_secs(300),
            task_timeout: Some(Duration::from_secs(1800)),
            default_limits: SourceLimits::default(),
            source_limits,
        }
    }
}

impl ReconConfig {
    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_task_retention(mut self, retention: Duration) -> Self {
        self.task_retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_default_limits(mut self, limits: SourceLimits) -> Self {
        self.default_limits = limits;
        self
    }

    /// Override limits for one source name.
    pub fn with_source_limits(mut self, source: impl Into<String>, limits: SourceLimits) -> Self {
        self.source_limits.insert(source.into(), limits);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sensible() {
        let config = ReconConfig::default();
        assert_eq!(config.max_concurrent_tasks, 3);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.cache_ttl, Duration::from_secs(3600));
        assert!(config.task_timeout.is_some());
    }

    #[test]
    fn test_default_per_portal_rates() {
        let config = ReconConfig::default();

        let per_minute = |source: &str| config.source_limits[source].rate_limiter.rate;
        assert_eq!(per_minute("comprar"), 100.0);
        assert_eq!(per_minute("contratar"), 120.0);
        assert_eq!(per_minute("bac"), 80.0);
        assert_eq!(per_minute("comprar_mendoza"), 60.0);
        assert_eq!(per_minute("compras_mendoza"), 60.0);

        // Unlisted portals fall back to the polite default.
        assert!(!config.source_limits.contains_key("otro"));
        assert_eq!(config.default_limits.rate_limiter.rate, 60.0);
    }

    #[test]
    fn test_builder() {
        let config = ReconConfig::default()
            .with_max_concurrent_tasks(1)
            .with_batch_size(2)
            .with_task_timeout(None)
            .with_source_limits("comprar", SourceLimits::per_minute(10.0));

        assert_eq!(config.max_concurrent_tasks, 1);
        assert_eq!(config.batch_size, 2);
        assert!(config.task_timeout.is_none());
        // An explicit override replaces the seeded portal entry.
        assert_eq!(config.source_limits["comprar"].rate_limiter.rate, 10.0);
    }
}
