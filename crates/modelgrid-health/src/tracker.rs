//! Poll failure tracking with exponential backoff.

use std::time::Duration;

use tracing::{debug, warn};

/// Upper bound on the delay between failing polls.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Tracks consecutive poll failures for one service.
#[derive(Debug)]
pub struct BackoffTracker {
    consecutive_failures: u32,
    current: Duration,
    base: Duration,
    max: Duration,
}

impl BackoffTracker {
    pub fn new(base: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            current: base,
            base,
            max: MAX_BACKOFF.max(base),
        }
    }

    /// A successful poll resets the delay to the base interval.
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 {
            debug!(
                failures = self.consecutive_failures,
                "health polling recovered"
            );
        }
        self.consecutive_failures = 0;
        self.current = self.base;
    }

    /// A failed poll doubles the delay, up to the cap.
    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        self.current = (self.current * 2).min(self.max);
        if self.consecutive_failures == 1 {
            warn!(next_ms = self.current.as_millis() as u64, "health polling failing, backing off");
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Delay before the next poll.
    pub fn next_interval(&self) -> Duration {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_base() {
        let tracker = BackoffTracker::new(Duration::from_secs(15));
        assert_eq!(tracker.next_interval(), Duration::from_secs(15));
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn failures_double_interval() {
        let mut tracker = BackoffTracker::new(Duration::from_secs(1));
        tracker.record_failure();
        assert_eq!(tracker.next_interval(), Duration::from_secs(2));
        tracker.record_failure();
        assert_eq!(tracker.next_interval(), Duration::from_secs(4));
        assert_eq!(tracker.consecutive_failures(), 2);
    }

    #[test]
    fn backoff_caps_at_max() {
        let mut tracker = BackoffTracker::new(Duration::from_secs(1));
        for _ in 0..10 {
            tracker.record_failure();
        }
        assert_eq!(tracker.next_interval(), MAX_BACKOFF);
    }

    #[test]
    fn success_resets() {
        let mut tracker = BackoffTracker::new(Duration::from_secs(1));
        tracker.record_failure();
        tracker.record_failure();
        tracker.record_success();
        assert_eq!(tracker.next_interval(), Duration::from_secs(1));
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn base_above_cap_is_kept() {
        let mut tracker = BackoffTracker::new(Duration::from_secs(90));
        tracker.record_failure();
        assert_eq!(tracker.next_interval(), Duration::from_secs(90));
    }
}
