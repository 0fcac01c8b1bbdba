//! Time source for log timestamps and dwell bookkeeping.
//!
//! Components never read `SystemTime` directly. `SystemClock` anchors a
//! wall-clock epoch on `tokio::time::Instant`, so tests running under a
//! paused tokio clock see timestamps advance together with their sleeps.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Source of Unix timestamps in milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock that follows tokio's (possibly paused) timer.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
    epoch_ms_at_origin: u64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            epoch_ms_at_origin: epoch_ms(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.epoch_ms_at_origin + self.origin.elapsed().as_millis() as u64
    }
}

/// Current Unix time in milliseconds.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
