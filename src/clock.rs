//! Monotonic clock capability.
//!
//! The session state machine never calls `std::time::Instant`/`std::thread::sleep`
//! directly — every deadline and turnaround delay goes through this trait so a
//! test harness can drive the retry cap, lockout guard, and turnaround-delay
//! properties in milliseconds instead of real wall-clock minutes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A source of monotonic timestamps and sleeps.
pub trait Clock: Send + Sync {
    /// Milliseconds since some fixed but arbitrary origin. Only differences
    /// between two calls are meaningful.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for `duration`. A mock clock may choose to
    /// advance its own notion of time instead of actually sleeping.
    fn sleep(&self, duration: Duration);

    /// Convenience: has `deadline_ms` (an absolute timestamp from `now_ms`)
    /// already passed?
    fn is_past(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }
}

/// Production clock backed by `std::time::Instant`.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Deterministic clock for tests: `sleep` advances an internal counter
/// instead of blocking, so retry/backoff/lockout logic runs instantly.
pub struct MockClock {
    millis: AtomicU64,
}

impl MockClock {
    pub fn new() -> Self {
        Self { millis: AtomicU64::new(0) }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.millis.fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }
}
