//! Playback clocks.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;

/// Monotonic clock audio is scheduled against, in seconds.
#[async_trait]
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> f64;

    fn is_suspended(&self) -> bool {
        false
    }

    /// Resume a suspended clock. May have to wait for the output device.
    async fn resume(&self) {}
}

/// Wall clock starting at zero when created.
///
/// Built on the tokio clock so paused-time tests drive it too.
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

#[async_trait]
impl PlaybackClock for SystemClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock, starts suspended.
pub struct ManualClock {
    now: Mutex<f64>,
    suspended: AtomicBool,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
            suspended: AtomicBool::new(true),
        }
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

#[async_trait]
impl PlaybackClock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    async fn resume(&self) {
        tokio::task::yield_now().await;
        self.suspended.store(false, Ordering::SeqCst);
    }
}
