//! Admission circuit breaker
//!
//! Three-state gate in front of the pipeline intake. Closed passes
//! everything; consecutive downstream faults trip it open; after the
//! reset timeout a single probe is let through to test recovery. All
//! transitions are compare-and-swap on atomics, so the admission check
//! never takes a lock.

#![allow(clippy::cast_sign_loss)]

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Admitting all requests
    Closed,
    /// Rejecting requests until the reset timeout elapses
    Open,
    /// One recovery probe in flight
    HalfOpen,
}

/// Lock-free three-state circuit breaker
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU64,
    last_failure_time: AtomicU64,
    threshold: u64,
    timeout_ms: u64,
}

impl CircuitBreaker {
    /// Create a breaker tripping after `threshold` consecutive failures
    /// and probing again `timeout_ms` after the last failure
    #[must_use]
    pub const fn new(threshold: u64, timeout_ms: u64) -> Self {
        Self {
            state: AtomicU8::new(CLOSED),
            failure_count: AtomicU64::new(0),
            last_failure_time: AtomicU64::new(0),
            threshold: if threshold == 0 { 1 } else { threshold },
            timeout_ms,
        }
    }

    /// Whether a new request may enter the pipeline
    ///
    /// While open, the first caller after the reset timeout wins the
    /// half-open transition and becomes the single recovery probe; every
    /// concurrent caller keeps seeing `false` until the probe resolves.
    pub fn allow(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            CLOSED => true,
            OPEN => {
                let now = now_millis();
                let last = self.last_failure_time.load(Ordering::Relaxed);
                if now.saturating_sub(last) >= self.timeout_ms {
                    self.state
                        .compare_exchange(
                            OPEN,
                            HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                } else {
                    false
                }
            }
            // Probe already in flight
            _ => false,
        }
    }

    /// Record a successful pass through a stage
    ///
    /// Clears the failure streak and closes the breaker, resolving a
    /// half-open probe in favor of recovery.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
        self.state.store(CLOSED, Ordering::Release);
    }

    /// Record a downstream failure
    ///
    /// A failed half-open probe reopens the breaker immediately;
    /// otherwise failures accumulate until the threshold trips it.
    pub fn record_failure(&self) {
        self.last_failure_time.store(now_millis(), Ordering::Relaxed);

        if self
            .state
            .compare_exchange(HALF_OPEN, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return;
        }

        let count = self.failure_count.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= self.threshold {
            let _ = self.state.compare_exchange(
                CLOSED,
                OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Current state, for diagnostics and reporting
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => BreakerState::Closed,
            OPEN => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }

    /// Current failure streak
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

// timestamp_millis is i64; clamped at zero it fits u64
fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
