//! Host timer access
//!
//! The pacing core only needs two things from the host: a monotonic
//! millisecond counter and a way to sleep. The counter is a wrapping `u32`;
//! all arithmetic on it goes through `wrapping_sub`, so a process that runs
//! for 49.7 days keeps pacing correctly across the wrap.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic clock read and sleep primitive
pub trait TimeSource {
    /// Milliseconds since an arbitrary origin, wrapping at `u32::MAX`
    fn now_ms(&self) -> u32;

    /// Block the calling thread for roughly `ms` milliseconds.
    /// Callers must tolerate oversleeping.
    fn sleep_ms(&self, ms: u32);
}

/// Real monotonic clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation is the wrap
        self.origin.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Deterministic clock for tests and headless runs.
///
/// Cloning shares the same counter, so a test can keep a handle and move
/// time while the pacer owns another. Sleeping advances the counter by the
/// requested amount plus a configurable oversleep.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    inner: Arc<SimulatedInner>,
}

#[derive(Debug, Default)]
struct SimulatedInner {
    now_ms: AtomicU32,
    oversleep_ms: AtomicU32,
    sleep_calls: AtomicU64,
}

impl SimulatedClock {
    pub fn new(start_ms: u32) -> Self {
        let clock = Self::default();
        clock.set(start_ms);
        clock
    }

    pub fn set(&self, ms: u32) {
        self.inner.now_ms.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u32) {
        self.inner.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Move the counter backwards (models a misbehaving host timer)
    pub fn rewind(&self, ms: u32) {
        self.inner.now_ms.fetch_sub(ms, Ordering::SeqCst);
    }

    /// Extra milliseconds added to every sleep
    pub fn set_oversleep(&self, ms: u32) {
        self.inner.oversleep_ms.store(ms, Ordering::SeqCst);
    }

    pub fn sleep_calls(&self) -> u64 {
        self.inner.sleep_calls.load(Ordering::SeqCst)
    }
}

impl TimeSource for SimulatedClock {
    fn now_ms(&self) -> u32 {
        self.inner.now_ms.load(Ordering::SeqCst)
    }

    fn sleep_ms(&self, ms: u32) {
        self.inner.sleep_calls.fetch_add(1, Ordering::SeqCst);
        let extra = self.inner.oversleep_ms.load(Ordering::SeqCst);
        self.inner
            .now_ms
            .fetch_add(ms.wrapping_add(extra), Ordering::SeqCst);
    }
}
