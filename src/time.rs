//! Monotonic-ish wall clock, refreshed once per tick.
//!
//! Liveness and expiry logic never calls `SystemTime::now()` directly so that
//! tests can freeze the clock and advance it past an expiry threshold with no
//! ping response, asserting the slot is zeroed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current unix time, in seconds.
pub trait Clock: Send + Sync {
    fn unix_time(&self) -> u64;

    fn is_timeout(&self, last: u64, timeout: u64) -> bool {
        self.unix_time().saturating_sub(last) > timeout
    }
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_time(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_secs()
    }
}

/// A clock that only advances when told to. Used by tests.
#[derive(Debug, Default)]
pub struct FrozenClock {
    now: AtomicU64,
}

impl FrozenClock {
    pub fn new(now: u64) -> Self {
        Self {
            now: AtomicU64::new(now),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, now: u64) {
        self.now.store(now, Ordering::SeqCst);
    }
}

impl Clock for FrozenClock {
    fn unix_time(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}
