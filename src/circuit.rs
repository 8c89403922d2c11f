//! Per-provider circuit breaker.
//!
//! Three states: `Closed` admits everything; `Open(since, until)` rejects
//! until `until` elapses, then becomes `HalfOpen`; `HalfOpen(budget)` admits
//! a fixed number of probe requests and closes once that many have
//! succeeded with no intervening failure. A single failure anywhere in
//! `HalfOpen` reopens the circuit immediately and the probe budget is
//! dropped, not carried over.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Externally observable circuit state, independent of the admission bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Admitting all requests.
    Closed,
    /// Rejecting all requests until the reset deadline elapses.
    Open,
    /// Admitting a bounded number of probe requests.
    HalfOpen,
}

impl CircuitState {
    /// Lowercase label used in logs and observability surfaces.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Inner {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// Configuration a circuit breaker is built from.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` before tripping to `Open`.
    pub failure_threshold: u32,
    /// How long `Open` rejects requests before admitting a half-open probe.
    #[serde(with = "crate::config::humantime_serde")]
    pub reset_timeout: Duration,
    /// Number of consecutive successful probes required to close from `HalfOpen`.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_requests: 3,
        }
    }
}

/// Per-provider circuit breaker. Cheap to share behind an `Arc`.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: RwLock<Inner>,
    consecutive_failures: AtomicU32,
    /// Tickets remaining to admit while `HalfOpen`; also gates admission
    /// (a ticket is consumed on admission, so at most `half_open_max_requests`
    /// probes are ever dispatched per half-open window).
    half_open_tickets: AtomicU32,
    /// Successes still required, while `HalfOpen`, before closing.
    half_open_successes_needed: AtomicU32,
    trips_total: AtomicU32,
}

impl CircuitBreaker {
    /// Build a new circuit breaker starting in `Closed`.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: RwLock::new(Inner::Closed),
            consecutive_failures: AtomicU32::new(0),
            half_open_tickets: AtomicU32::new(0),
            half_open_successes_needed: AtomicU32::new(0),
            trips_total: AtomicU32::new(0),
        }
    }

    /// Whether a new request may be dispatched right now. Has the side
    /// effect of transitioning `Open` → `HalfOpen` once the reset deadline
    /// has elapsed, and consumes a probe ticket when admitting in `HalfOpen`.
    #[tracing::instrument(skip(self), fields(provider = %self.name))]
    pub fn try_acquire(&self) -> bool {
        let snapshot = *self.state.read();
        match snapshot {
            Inner::Closed => true,
            Inner::Open { until } => {
                if Instant::now() >= until {
                    self.enter_half_open();
                    self.take_half_open_ticket()
                } else {
                    false
                }
            }
            Inner::HalfOpen => self.take_half_open_ticket(),
        }
    }

    fn take_half_open_ticket(&self) -> bool {
        self.half_open_tickets
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| t.checked_sub(1))
            .is_ok()
    }

    /// Record a successful call.
    #[tracing::instrument(skip(self), fields(provider = %self.name))]
    pub fn record_success(&self) {
        let snapshot = *self.state.read();
        match snapshot {
            Inner::Closed => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
            }
            Inner::HalfOpen => {
                let remaining = self.half_open_successes_needed.fetch_sub(1, Ordering::AcqRel) - 1;
                if remaining == 0 {
                    self.enter_closed();
                }
            }
            Inner::Open { .. } => {}
        }
    }

    /// Record a failed call. In `Closed`, trips to `Open` once
    /// `failure_threshold` consecutive failures accumulate. In `HalfOpen`,
    /// any failure reopens immediately and the probe budget is dropped.
    #[tracing::instrument(skip(self), fields(provider = %self.name))]
    pub fn record_failure(&self) {
        let snapshot = *self.state.read();
        match snapshot {
            Inner::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.enter_open();
                }
            }
            Inner::HalfOpen => self.enter_open(),
            Inner::Open { .. } => {}
        }
    }

    /// Current externally observable state.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        match *self.state.read() {
            Inner::Closed => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen => CircuitState::HalfOpen,
        }
    }

    /// Total number of `Closed`/`HalfOpen` → `Open` transitions so far.
    #[must_use]
    pub fn trips_total(&self) -> u32 {
        self.trips_total.load(Ordering::Relaxed)
    }

    fn enter_open(&self) {
        let mut state = self.state.write();
        *state = Inner::Open {
            until: Instant::now() + self.config.reset_timeout,
        };
        self.half_open_tickets.store(0, Ordering::Release);
        self.half_open_successes_needed.store(0, Ordering::Release);
        self.trips_total.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(provider = %self.name, "circuit opened");
    }

    fn enter_half_open(&self) {
        let mut state = self.state.write();
        if matches!(*state, Inner::HalfOpen) {
            return;
        }
        *state = Inner::HalfOpen;
        self.half_open_tickets.store(self.config.half_open_max_requests, Ordering::Release);
        self.half_open_successes_needed.store(self.config.half_open_max_requests, Ordering::Release);
        tracing::debug!(provider = %self.name, budget = self.config.half_open_max_requests, "circuit half-open");
    }

    fn enter_closed(&self) {
        let mut state = self.state.write();
        *state = Inner::Closed;
        self.consecutive_failures.store(0, Ordering::Relaxed);
        tracing::info!(provider = %self.name, "circuit closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(failure_threshold: u32, half_open_max_requests: u32) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            reset_timeout: Duration::ZERO,
            half_open_max_requests,
        }
    }

    #[test]
    fn starts_closed_and_admits() {
        let cb = CircuitBreaker::new("p", cfg(3, 2));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let cb = CircuitBreaker::new("p", cfg(3, 2));
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.trips_total(), 1);
    }

    #[test]
    fn success_resets_consecutive_failure_count_in_closed() {
        let cb = CircuitBreaker::new("p", cfg(3, 2));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed, "failure count must have reset after the success");
    }

    #[test]
    fn open_transitions_to_half_open_after_reset_timeout_elapses() {
        let cb = CircuitBreaker::new("p", cfg(1, 2));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // reset_timeout is ZERO in this config, so the next acquire flips immediately.
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn half_open_admits_at_most_the_configured_probe_budget() {
        let cb = CircuitBreaker::new("p", cfg(1, 2));
        cb.record_failure();
        assert!(cb.try_acquire()); // flips to half-open, consumes ticket 1
        assert!(cb.try_acquire()); // consumes ticket 2
        assert!(!cb.try_acquire(), "no tickets left in this half-open window");
    }

    #[test]
    fn half_open_closes_once_all_probes_succeed() {
        let cb = CircuitBreaker::new("p", cfg(1, 2));
        cb.record_failure();
        assert!(cb.try_acquire());
        assert!(cb.try_acquire());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_drops_budget() {
        let cb = CircuitBreaker::new("p", cfg(1, 2));
        cb.record_failure();
        assert!(cb.try_acquire());
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.trips_total(), 2);
    }
}
