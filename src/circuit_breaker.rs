//! Circuit breaker guarding calls to one external procurement portal.
//!
//! Prevents hammering a source that is repeatedly failing, and probes
//! for recovery after a cool-down.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[timeout]--> HALF_OPEN (probing)
//!                                                                         |
//!                                       <--[failure]--                    |
//!                                                                         |
//! CLOSED <-------------------------[probe success]------------------------+
//! ```
//!
//! HALF_OPEN admits exactly one trial call at a time; concurrent calls
//! during the probe are rejected as if the circuit were still open.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::ReconError;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed - requests flow normally.
    Closed,
    /// Circuit is open - requests are rejected immediately.
    Open,
    /// Circuit is half-open - a single trial request probes recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening the circuit.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct CircuitBreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_error_message: Option<String>,
    /// A half-open trial call is currently in flight.
    probe_in_flight: bool,
}

impl CircuitBreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_error_message: None,
            probe_in_flight: false,
        }
    }
}

/// Statistics about circuit breaker state for monitoring.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub source: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Thread-safe circuit breaker for one source name. Cloning shares the
/// underlying state, so every task targeting the source observes the
/// same circuit.
#[derive(Clone)]
pub struct CircuitBreaker {
    source: String,
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(source: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            source: source.into(),
            config,
            inner: Arc::new(Mutex::new(CircuitBreakerInner::new())),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> std::sync::MutexGuard<'_, CircuitBreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(circuit = %self.source, "Recovered from poisoned mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the current state, handling lazy Open → HalfOpen transitions.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        let time_until_half_open = if inner.state == CircuitState::Open {
            inner
                .last_failure_time
                .map(|t| self.config.reset_timeout.saturating_sub(t.elapsed()))
        } else {
            None
        };

        CircuitBreakerStats {
            source: self.source.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            last_error: inner.last_error_message.clone(),
            time_until_half_open,
        }
    }

    /// Executes the given operation through the circuit breaker.
    ///
    /// - Closed: executes the operation, tracks success/failure
    /// - Open: returns [`ReconError::CircuitOpen`] without invoking it
    /// - HalfOpen: admits one trial; its outcome decides the next state
    ///
    /// Only errors whose [`ReconError::should_trip_circuit`] is true are
    /// recorded as failures; the returned `CircuitOpen` never is.
    pub async fn call<F, T, Fut>(&self, operation: F) -> Result<T, ReconError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ReconError>>,
    {
        let probe = self.try_admit()?;

        let result = operation().await;

        if let Some(probe) = probe {
            probe.disarm();
        }
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => {
                if e.should_trip_circuit() {
                    self.record_failure(e);
                } else {
                    // Non-fault errors still end the probe window.
                    self.clear_probe();
                }
            }
        }

        result
    }

    /// Admission check per the state machine. In HalfOpen the returned
    /// guard holds the single probe slot; dropping it without a
    /// reported outcome re-opens the circuit.
    fn try_admit(&self) -> Result<Option<ProbeGuard>, ReconError> {
        let mut inner = self.lock_inner();
        self.maybe_transition_to_half_open(&mut inner);

        match inner.state {
            CircuitState::Closed => Ok(None),
            CircuitState::Open => Err(ReconError::CircuitOpen {
                source_name: self.source.clone(),
                retry_after: inner
                    .last_failure_time
                    .map(|t| self.config.reset_timeout.saturating_sub(t.elapsed()))
                    .unwrap_or(self.config.reset_timeout),
            }),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(ReconError::CircuitOpen {
                        source_name: self.source.clone(),
                        retry_after: self.config.reset_timeout,
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(Some(ProbeGuard {
                        breaker: self.clone(),
                        armed: true,
                    }))
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %self.source, "Circuit breaker closing after successful probe");
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.last_failure_time = None;
                inner.last_error_message = None;
                inner.probe_in_flight = false;
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, error: &ReconError) {
        let mut inner = self.lock_inner();

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());

                if inner.failure_count >= self.config.failure_threshold {
                    tracing::warn!(
                        circuit = %self.source,
                        failures = inner.failure_count,
                        error = %error,
                        "Circuit breaker opening after {} consecutive failures",
                        inner.failure_count
                    );
                    inner.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                tracing::warn!(
                    circuit = %self.source,
                    error = %error,
                    "Circuit breaker probe failed, returning to open state"
                );
                inner.state = CircuitState::Open;
                inner.last_failure_time = Some(Instant::now());
                inner.last_error_message = Some(error.to_string());
                inner.probe_in_flight = false;
            }
            CircuitState::Open => {
                inner.last_error_message = Some(error.to_string());
            }
        }
    }

    /// Release the half-open probe slot without deciding the state.
    fn clear_probe(&self) {
        let mut inner = self.lock_inner();
        inner.probe_in_flight = false;
    }

    pub fn reset(&self) {
        let mut inner = self.lock_inner();
        tracing::info!(circuit = %self.source, "Circuit breaker manually reset");
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_time = None;
        inner.last_error_message = None;
        inner.probe_in_flight = false;
    }

    /// Re-open the circuit if an admitted probe was abandoned: the
    /// probe future was dropped (caller timeout, task cancellation)
    /// before reporting an outcome, so the slot must not leak.
    fn abandon_probe(&self) {
        let mut inner = self.lock_inner();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            tracing::warn!(
                circuit = %self.source,
                "Half-open probe abandoned, circuit re-opening"
            );
            inner.state = CircuitState::Open;
            inner.last_failure_time = Some(Instant::now());
            inner.probe_in_flight = false;
        }
    }

    fn maybe_transition_to_half_open(&self, inner: &mut CircuitBreakerInner) {
        if inner.state == CircuitState::Open
            && let Some(last_failure) = inner.last_failure_time
            && last_failure.elapsed() >= self.config.reset_timeout
        {
            tracing::info!(
                circuit = %self.source,
                "Circuit breaker transitioning to half-open state"
            );
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
        }
    }
}

/// Holds the single half-open probe slot.
///
/// Disarmed when the probed operation runs to an outcome (success or
/// failure each release the slot through their state transitions).
/// Dropped armed, it re-opens the circuit via [`CircuitBreaker::abandon_probe`].
struct ProbeGuard {
    breaker: CircuitBreaker,
    armed: bool,
}

impl ProbeGuard {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
        }
    }
}
