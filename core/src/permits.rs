//! Trial permits for the HalfOpen state
//!
//! A lock-free counter that hands out a fixed number of trial calls while a
//! circuit is HalfOpen. Permits are consumed by recorded outcomes, so unlike
//! a semaphore they are not returned when the call finishes; only an
//! ignored error gives its permit back.

use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct TrialPermits {
    /// Permits available for the current HalfOpen period
    limit: AtomicUsize,
    /// Permits handed out so far
    acquired: AtomicUsize,
}

impl TrialPermits {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            acquired: AtomicUsize::new(0),
        }
    }

    /// Start a new trial period with `limit` permits
    pub fn reset(&self, limit: usize) {
        self.acquired.store(0, Ordering::Release);
        self.limit.store(limit, Ordering::Release);
    }

    /// Try to take a permit without blocking
    pub fn try_acquire(&self) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        let mut current = self.acquired.load(Ordering::Acquire);

        loop {
            if current >= limit {
                return false;
            }

            match self.acquired.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                // Another thread modified the counter, try again
                Err(actual) => current = actual,
            }
        }
    }

    /// Give a permit back
    pub fn release(&self) {
        let _ = self
            .acquired
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.limit().saturating_sub(self.acquired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_permits_basic_acquire_release() {
        let permits = TrialPermits::new(2);

        assert!(permits.try_acquire());
        assert!(permits.try_acquire());
        assert!(!permits.try_acquire(), "Should not acquire past the limit");
        assert_eq!(permits.available(), 0);

        permits.release();
        assert_eq!(permits.available(), 1);
        assert!(permits.try_acquire());
    }

    #[test]
    fn test_release_never_underflows() {
        let permits = TrialPermits::new(1);
        permits.release();
        assert_eq!(permits.acquired(), 0);
    }

    #[test]
    fn test_reset_starts_new_period() {
        let permits = TrialPermits::new(1);
        assert!(permits.try_acquire());

        permits.reset(3);
        assert_eq!(permits.limit(), 3);
        assert_eq!(permits.available(), 3);
    }

    #[test]
    fn test_zero_limit_rejects() {
        let permits = TrialPermits::default();
        assert!(!permits.try_acquire());
    }

    #[test]
    fn test_permits_concurrent_access() {
        let permits = Arc::new(TrialPermits::new(5));
        let mut handles = vec![];

        for _ in 0..20 {
            let permits = Arc::clone(&permits);
            handles.push(thread::spawn(move || permits.try_acquire()));
        }

        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();

        assert_eq!(granted, 5, "Exactly the limit should be granted");
        assert_eq!(permits.acquired(), 5);
    }
}
