//! Per-run cancellation tokens.
//!
//! Each run's worker holds a `CancelToken`; calling `cancel()` or
//! `expire()` signals it to wind down. The `Cause` distinguishes a caller-
//! initiated stop from a wall-time budget expiring, which the loop maps
//! to `run.cancelled` vs `run.timed_out` respectively.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const NONE: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Why a run stopped before reaching `complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Cancelled,
    TimedOut,
}

/// A cancellation signal the loop worker polls between suspension points.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(NONE)),
        }
    }

    /// Caller-initiated stop.
    pub fn cancel(&self) {
        self.state.compare_exchange(
            NONE,
            CANCELLED,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ).ok();
    }

    /// Wall-time budget expired.
    pub fn expire(&self) {
        self.state.compare_exchange(
            NONE,
            TIMED_OUT,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ).ok();
    }

    pub fn cause(&self) -> Option<Cause> {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => Some(Cause::Cancelled),
            TIMED_OUT => Some(Cause::TimedOut),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != NONE
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of live run cancel tokens, keyed by run ID — lets an external
/// caller (an HTTP "stop" endpoint, a CLI signal handler) cancel a run by
/// ID without holding a reference to its worker task.
#[derive(Default)]
pub struct CancelRegistry {
    tokens: parking_lot::Mutex<std::collections::HashMap<String, CancelToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, run_id: impl Into<String>) -> CancelToken {
        let token = CancelToken::new();
        self.tokens.lock().insert(run_id.into(), token.clone());
        token
    }

    pub fn cancel(&self, run_id: &str) -> bool {
        if let Some(token) = self.tokens.lock().get(run_id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    pub fn remove(&self, run_id: &str) {
        self.tokens.lock().remove(run_id);
    }

    pub fn is_running(&self, run_id: &str) -> bool {
        self.tokens.lock().contains_key(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_then_expire_keeps_first_cause() {
        let token = CancelToken::new();
        token.cancel();
        token.expire();
        assert_eq!(token.cause(), Some(Cause::Cancelled));
    }

    #[test]
    fn expire_sets_timed_out_cause() {
        let token = CancelToken::new();
        token.expire();
        assert_eq!(token.cause(), Some(Cause::TimedOut));
        assert!(token.is_done());
    }

    #[test]
    fn registry_cancel_by_run_id() {
        let registry = CancelRegistry::new();
        let token = registry.register("run-1");
        assert!(registry.is_running("run-1"));
        assert!(registry.cancel("run-1"));
        assert_eq!(token.cause(), Some(Cause::Cancelled));
        registry.remove("run-1");
        assert!(!registry.is_running("run-1"));
    }

    #[test]
    fn cancel_nonexistent_run_returns_false() {
        let registry = CancelRegistry::new();
        assert!(!registry.cancel("ghost"));
    }
}
