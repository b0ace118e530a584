//! Per-source admission controls: one circuit breaker and one rate
//! limiter per source name, shared by every task targeting that source.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::SourceLimits;
use crate::rate_limiter::RateLimiter;

/// The admission pair guarding one source.
#[derive(Clone)]
pub struct SourceControls {
    pub breaker: CircuitBreaker,
    pub limiter: RateLimiter,
}

/// Lazily built map of [`SourceControls`], keyed by source name.
///
/// The first task to touch a source instantiates its controls from the
/// configured limits (an explicit override, or the defaults); later
/// tasks share the same instances via `Clone`.
pub struct SourceControlMap {
    defaults: SourceLimits,
    overrides: HashMap<String, SourceLimits>,
    controls: Mutex<HashMap<String, SourceControls>>,
}

impl SourceControlMap {
    pub fn new(defaults: SourceLimits, overrides: HashMap<String, SourceLimits>) -> Self {
        Self {
            defaults,
            overrides,
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or build) the controls for `source`.
    pub fn get(&self, source: &str) -> SourceControls {
        let mut controls = self.controls.lock().unwrap_or_else(|p| p.into_inner());
        controls
            .entry(source.to_string())
            .or_insert_with(|| {
                let limits = self.overrides.get(source).unwrap_or(&self.defaults);
                tracing::debug!(%source, "Creating source controls");
                SourceControls {
                    breaker: CircuitBreaker::new(source, limits.circuit_breaker.clone()),
                    limiter: RateLimiter::new(limits.rate_limiter.clone()),
                }
            })
            .clone()
    }
}
