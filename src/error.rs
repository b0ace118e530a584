use std::time::Duration;

use thiserror::Error;

/// Error types for the RECON coordination core.
#[derive(Error, Debug)]
pub enum ReconError {
    /// A source call (search or detail fetch) failed.
    ///
    /// The portal name is `source_name`, not `source`: `thiserror`
    /// reserves a field called `source` for the error cause chain.
    #[error("Extraction error from '{source_name}': {message}")]
    Extraction {
        source_name: String,
        message: String,
    },

    /// Analysis of a single document failed. Never fatal to the task;
    /// recorded alongside successful documents in the task result.
    #[error("Document analysis error: {0}")]
    Analysis(String),

    /// Persisting a record failed.
    #[error("Store error: {0}")]
    Store(String),

    /// The source's circuit breaker rejected the call without invoking it.
    ///
    /// A local short-circuit, not evidence of a new fault: must never be
    /// counted against the breaker's failure threshold.
    #[error("Circuit breaker for '{source_name}' is open, retry after {}s", retry_after.as_secs())]
    CircuitOpen {
        source_name: String,
        retry_after: Duration,
    },

    /// The source's token bucket is empty. Callers should back off for
    /// `retry_after` and retry rather than fail the task.
    #[error("Rate limit exceeded, retry after {:.2}s", retry_after.as_secs_f64())]
    RateLimited { retry_after: Duration },

    /// Task execution exceeded the configured wall-clock timeout.
    #[error("Task timed out after {0} seconds")]
    Timeout(u64),

    /// Status query for an unknown task id.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Status query for an unknown batch id.
    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl ReconError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconError::RateLimited { .. }
            | ReconError::CircuitOpen { .. }
            | ReconError::Timeout(_) => true,
            ReconError::Extraction { message, .. } => {
                message.contains("timeout")
                    || message.contains("connect")
                    || message.contains("reset")
            }
            _ => false,
        }
    }

    /// Returns true if this error should count against a source's
    /// circuit breaker.
    ///
    /// `CircuitOpen` and `RateLimited` are local admission decisions,
    /// not observations of the source misbehaving, so they never trip.
    pub fn should_trip_circuit(&self) -> bool {
        matches!(
            self,
            ReconError::Extraction { .. } | ReconError::Timeout(_)
        )
    }
}
