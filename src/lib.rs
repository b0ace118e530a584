pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod queue;
pub mod rate_limiter;
pub mod source;
pub mod task;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{ReconConfig, SourceLimits};
pub use coordinator::ReconCoordinator;
pub use error::ReconError;
pub use metrics::{MetricsCollector, MetricsSnapshot};
pub use progress::{ProgressSnapshot, ScrapingProgress};
pub use queue::TaskQueue;
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use task::{
    BatchStatusView, ReconTemplate, SourceQuery, TaskPriority, TaskStatus, TaskStatusView,
    TenderRecord,
};
pub use traits::{
    Analyzer, Extractor, ExtractorRegistry, Notifier, PersistOutcome, RecordStore, TaskEvent,
};
