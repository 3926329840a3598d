//! Time Source
//!
//! All simulation timestamps are wall-clock milliseconds. Clients are only
//! loosely synchronized, so every deadline the arena computes (fuses, lobby
//! countdown, shrink levels) is anchored to a timestamp stored in the room
//! rather than to a local timer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds since the Unix epoch.
pub type Millis = u64;

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds.
    fn now_ms(&self) -> Millis;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        chrono::Utc::now().timestamp_millis().max(0) as Millis
    }
}

/// Manually driven clock for tests and offline simulation.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Millis) -> Self {
        Self { now: AtomicU64::new(start) }
    }

    /// Move the clock forward.
    pub fn advance(&self, delta: Millis) -> Millis {
        self.now.fetch_add(delta, Ordering::SeqCst) + delta
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: Millis) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
