//! Per-provider circuit breaker (spec §4.3 "Circuit breaker", §3
//! "ProviderState").
//!
//! Closed → open after `threshold` consecutive failures. Open → half-open
//! once `timeout` has elapsed since the circuit opened; exactly one probe
//! is allowed through in the half-open state.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

/// Per-provider failure bookkeeping and circuit state (spec §3
/// "ProviderState": failure count, last failure time, consecutive
/// failures, circuit-open flag, circuit-opened-at).
pub struct ProviderState {
    inner: Mutex<Inner>,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    total_failures: u32,
    opened_at: Option<Instant>,
    /// Set while a half-open probe is in flight, to admit exactly one.
    probe_in_flight: bool,
}

impl ProviderState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                total_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Is this provider allowed to take a request right now? Consumes the
    /// single half-open probe slot if the cool-down has elapsed.
    pub fn is_available(&self, threshold: u32, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            State::Closed => true,
            State::HalfOpen => !inner.probe_in_flight && {
                inner.probe_in_flight = true;
                true
            },
            State::Open => {
                let opened_at = match inner.opened_at {
                    Some(t) => t,
                    None => return true,
                };
                if opened_at.elapsed() >= timeout {
                    inner.state = State::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    let _ = threshold;
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.state = State::Closed;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self, threshold: u32) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        inner.total_failures += 1;
        inner.probe_in_flight = false;
        if inner.state == State::HalfOpen || inner.consecutive_failures >= threshold {
            inner.state = State::Open;
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.inner.lock().state, State::Open)
    }

    pub fn total_failures(&self) -> u32 {
        self.inner.lock().total_failures
    }
}

impl Default for ProviderState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let state = ProviderState::new();
        state.record_failure(2);
        assert!(state.is_available(2, Duration::from_secs(30)));
        state.record_failure(2);
        assert!(state.is_open());
        assert!(!state.is_available(2, Duration::from_secs(30)));
    }

    #[test]
    fn half_open_admits_single_probe() {
        let state = ProviderState::new();
        state.record_failure(1);
        assert!(state.is_open());
        assert!(state.is_available(1, Duration::from_millis(0)));
        assert!(!state.is_available(1, Duration::from_millis(0)));
    }

    #[test]
    fn success_closes_circuit() {
        let state = ProviderState::new();
        state.record_failure(1);
        assert!(state.is_available(1, Duration::from_millis(0)));
        state.record_success();
        assert!(!state.is_open());
        assert!(state.is_available(1, Duration::from_secs(30)));
    }
}
