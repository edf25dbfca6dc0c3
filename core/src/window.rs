//! Sliding windows for call outcome aggregation
//!
//! This module provides two window implementations:
//! - count-based: a ring of the last N outcomes
//! - time-based: a ring of N one-second buckets
//!
//! Both keep running totals so that recording an outcome and reading the
//! current rates are O(1) for the count-based window and O(N) in buckets
//! for the time-based one.

use crate::config::{CircuitBreakerConfig, SlidingWindowType};
use std::collections::VecDeque;

/// Classified outcome of a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    SlowSuccess,
    SlowError,
}

impl Outcome {
    pub fn classify(failed: bool, slow: bool) -> Self {
        match (failed, slow) {
            (false, false) => Outcome::Success,
            (true, false) => Outcome::Error,
            (false, true) => Outcome::SlowSuccess,
            (true, true) => Outcome::SlowError,
        }
    }

    fn is_failure(self) -> bool {
        matches!(self, Outcome::Error | Outcome::SlowError)
    }

    fn is_slow(self) -> bool {
        matches!(self, Outcome::SlowSuccess | Outcome::SlowError)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counts {
    total: usize,
    failed: usize,
    slow: usize,
    slow_failed: usize,
}

impl Counts {
    fn add(&mut self, outcome: Outcome) {
        self.total += 1;
        if outcome.is_failure() {
            self.failed += 1;
        }
        if outcome.is_slow() {
            self.slow += 1;
            if outcome.is_failure() {
                self.slow_failed += 1;
            }
        }
    }

    fn remove(&mut self, outcome: Outcome) {
        self.total = self.total.saturating_sub(1);
        if outcome.is_failure() {
            self.failed = self.failed.saturating_sub(1);
        }
        if outcome.is_slow() {
            self.slow = self.slow.saturating_sub(1);
            if outcome.is_failure() {
                self.slow_failed = self.slow_failed.saturating_sub(1);
            }
        }
    }

    fn merge(&mut self, other: &Counts) {
        self.total += other.total;
        self.failed += other.failed;
        self.slow += other.slow;
        self.slow_failed += other.slow_failed;
    }
}

/// Aggregated view of a window at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WindowSnapshot {
    pub total_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub slow_failed_calls: usize,
}

impl WindowSnapshot {
    fn from_counts(counts: Counts) -> Self {
        Self {
            total_calls: counts.total,
            failed_calls: counts.failed,
            slow_calls: counts.slow,
            slow_failed_calls: counts.slow_failed,
        }
    }

    pub fn successful_calls(&self) -> usize {
        self.total_calls - self.failed_calls
    }

    /// Failure rate in percent (0.0 for an empty window)
    pub fn failure_rate(&self) -> f32 {
        percent(self.failed_calls, self.total_calls)
    }

    /// Slow call rate in percent (0.0 for an empty window)
    pub fn slow_call_rate(&self) -> f32 {
        percent(self.slow_calls, self.total_calls)
    }
}

fn percent(part: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 * 100.0 / total as f32
    }
}

/// Ring of the last `size` outcomes
#[derive(Debug, Clone)]
pub struct CountWindow {
    outcomes: VecDeque<Outcome>,
    size: usize,
    totals: Counts,
}

impl CountWindow {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            outcomes: VecDeque::with_capacity(size),
            size,
            totals: Counts::default(),
        }
    }

    fn record(&mut self, outcome: Outcome) {
        if self.outcomes.len() == self.size
            && let Some(evicted) = self.outcomes.pop_front()
        {
            self.totals.remove(evicted);
        }
        self.outcomes.push_back(outcome);
        self.totals.add(outcome);
    }

    fn reset(&mut self) {
        self.outcomes.clear();
        self.totals = Counts::default();
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch_second: u64,
    counts: Counts,
}

/// Ring of `size` one-second buckets
#[derive(Debug, Clone)]
pub struct TimeWindow {
    buckets: Vec<Bucket>,
}

impl TimeWindow {
    pub fn new(size_secs: usize) -> Self {
        Self {
            buckets: vec![Bucket::default(); size_secs.max(1)],
        }
    }

    fn size(&self) -> u64 {
        self.buckets.len() as u64
    }

    fn record(&mut self, outcome: Outcome, now: f64) {
        let second = epoch_second(now);
        let index = (second % self.size()) as usize;
        let bucket = &mut self.buckets[index];
        if bucket.epoch_second != second {
            *bucket = Bucket {
                epoch_second: second,
                counts: Counts::default(),
            };
        }
        bucket.counts.add(outcome);
    }

    fn totals(&self, now: f64) -> Counts {
        let second = epoch_second(now);
        let oldest = second.saturating_sub(self.size() - 1);
        let mut totals = Counts::default();
        for bucket in &self.buckets {
            if bucket.counts.total > 0
                && bucket.epoch_second >= oldest
                && bucket.epoch_second <= second
            {
                totals.merge(&bucket.counts);
            }
        }
        totals
    }

    fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|b| *b = Bucket::default());
    }
}

fn epoch_second(now: f64) -> u64 {
    if now.is_finite() && now > 0.0 {
        now.floor() as u64
    } else {
        0
    }
}

/// Sliding window of call outcomes
#[derive(Debug, Clone)]
pub enum SlidingWindow {
    Count(CountWindow),
    Time(TimeWindow),
}

impl SlidingWindow {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        match config.sliding_window_type {
            SlidingWindowType::CountBased => Self::count_based(config.sliding_window_size),
            SlidingWindowType::TimeBased => Self::time_based(config.sliding_window_size),
        }
    }

    pub fn count_based(size: usize) -> Self {
        SlidingWindow::Count(CountWindow::new(size))
    }

    pub fn time_based(size_secs: usize) -> Self {
        SlidingWindow::Time(TimeWindow::new(size_secs))
    }

    /// Record an outcome observed at monotonic time `now` and return the
    /// resulting aggregate
    pub fn record(&mut self, outcome: Outcome, now: f64) -> WindowSnapshot {
        match self {
            SlidingWindow::Count(w) => w.record(outcome),
            SlidingWindow::Time(w) => w.record(outcome, now),
        }
        self.snapshot(now)
    }

    pub fn snapshot(&self, now: f64) -> WindowSnapshot {
        match self {
            SlidingWindow::Count(w) => WindowSnapshot::from_counts(w.totals),
            SlidingWindow::Time(w) => WindowSnapshot::from_counts(w.totals(now)),
        }
    }

    pub fn reset(&mut self) {
        match self {
            SlidingWindow::Count(w) => w.reset(),
            SlidingWindow::Time(w) => w.reset(),
        }
    }
}
