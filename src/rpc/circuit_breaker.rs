//! Closed/Open/Half-Open breaker in front of the endpoint. Consecutive
//! transport failures open it; after a cooldown a limited number of probe
//! requests decide whether it closes again.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;
const DEFAULT_HALF_OPEN_PROBES: usize = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub opened_at: Option<Instant>,
}

#[derive(Debug)]
pub enum CircuitBreakerError {
    CircuitOpen,
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::CircuitOpen => write!(f, "RPC circuit breaker is open"),
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    probes_in_flight: usize,
}

impl Inner {
    fn cooldown_elapsed(&self, cooldown: Duration) -> bool {
        self.opened_at
            .is_some_and(|opened_at| opened_at.elapsed() >= cooldown)
    }
}

/// Cloning shares the same breaker state.
#[derive(Debug, Clone)]
pub struct RpcCircuitBreaker {
    inner: Arc<Mutex<Inner>>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_probes: usize,
}

impl Default for RpcCircuitBreaker {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAILURE_THRESHOLD,
            Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            DEFAULT_HALF_OPEN_PROBES,
        )
    }
}

impl RpcCircuitBreaker {
    /// Zero values are clamped: at least one failure, one probe, one second.
    pub fn new(failure_threshold: usize, cooldown: Duration, half_open_probes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            })),
            failure_threshold: failure_threshold.max(1),
            cooldown: if cooldown.is_zero() {
                Duration::from_secs(1)
            } else {
                cooldown
            },
            half_open_probes: half_open_probes.max(1),
        }
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        CircuitBreakerSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    /// Admits or refuses a request. In Half-Open a probe slot is reserved and
    /// released by the matching `record_*` call.
    pub fn before_request(&self) -> Result<CircuitState, CircuitBreakerError> {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");

        match inner.state {
            CircuitState::Closed => return Ok(CircuitState::Closed),
            CircuitState::Open if inner.cooldown_elapsed(self.cooldown) => {
                inner.probes_in_flight = 0;
                Self::transition(&mut inner, CircuitState::HalfOpen);
            }
            CircuitState::Open => return Err(CircuitBreakerError::CircuitOpen),
            CircuitState::HalfOpen => {}
        }

        if inner.probes_in_flight >= self.half_open_probes {
            return Err(CircuitBreakerError::CircuitOpen);
        }
        inner.probes_in_flight += 1;
        Ok(CircuitState::HalfOpen)
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        Self::release_probe(&mut inner);
        inner.consecutive_failures = 0;

        if inner.state == CircuitState::HalfOpen {
            inner.opened_at = None;
            Self::transition(&mut inner, CircuitState::Closed);
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("circuit breaker mutex poisoned");
        Self::release_probe(&mut inner);
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.consecutive_failures >= self.failure_threshold,
            CircuitState::Open => false,
        };

        if should_open {
            inner.opened_at = Some(Instant::now());
            inner.probes_in_flight = 0;
            Self::transition(&mut inner, CircuitState::Open);
        }
    }

    fn release_probe(inner: &mut Inner) {
        if inner.state == CircuitState::HalfOpen {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
    }

    fn transition(inner: &mut Inner, next: CircuitState) {
        if inner.state != next {
            tracing::warn!(
                previous = ?inner.state,
                next = ?next,
                consecutive_failures = inner.consecutive_failures,
                "rpc circuit breaker state changed"
            );
            inner.state = next;
        }
    }
}
