//! Time sources for circuit breakers
//!
//! All durations inside a breaker are measured against a monotonic clock so
//! that wall-clock adjustments (NTP) never shorten or stretch an open wait.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Monotonic time source, in seconds relative to an arbitrary anchor
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn monotonic_time(&self) -> f64;
}

/// Clock anchored at its creation instant
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Manually driven clock for deterministic tests
///
/// # Example
///
/// ```rust
/// use breaker_events::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new();
/// clock.advance(Duration::from_millis(1500));
/// assert_eq!(clock.monotonic_time(), 1.5);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(by.as_nanos().min(u64::MAX as u128) as u64, Ordering::AcqRel);
    }

    /// Jump to an absolute offset from the anchor
    pub fn set(&self, at: Duration) {
        self.nanos
            .store(at.as_nanos().min(u64::MAX as u128) as u64, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        Duration::from_nanos(self.nanos.load(Ordering::Acquire)).as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let t1 = clock.monotonic_time();
        std::thread::sleep(Duration::from_millis(10));
        let t2 = clock.monotonic_time();

        assert!(t2 > t1);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new();
        assert_eq!(clock.monotonic_time(), 0.0);

        clock.advance(Duration::from_secs(2));
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.monotonic_time(), 2.25);

        clock.set(Duration::from_secs(1));
        assert_eq!(clock.monotonic_time(), 1.0);
    }
}
