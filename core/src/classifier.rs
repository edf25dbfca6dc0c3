//! Failure classification for error filtering
//!
//! This module provides traits and types for determining which errors
//! count toward the failure rate and which are reported as ignored.

use std::any::Any;
use std::time::Duration;

/// Context provided to failure classifiers for error evaluation
#[derive(Debug)]
pub struct FailureContext<'a> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error that occurred (can be downcast to specific types)
    pub error: &'a dyn Any,
    /// Duration of the failed call
    pub duration: Duration,
}

/// How a failed call is accounted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Counts toward the failure rate (ERROR event)
    Record,
    /// Excluded from every rate (IGNORED_ERROR event)
    Ignore,
}

/// Trait for classifying failures
///
/// Implementors can inspect the error type and context to decide whether
/// this particular failure should count toward opening the circuit.
///
/// # Examples
///
/// ```rust
/// use breaker_events::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// struct ServerErrorClassifier;
///
/// impl FailureClassifier for ServerErrorClassifier {
///     fn should_record(&self, ctx: &FailureContext<'_>) -> bool {
///         ctx.error
///             .downcast_ref::<u16>()
///             .map(|status| *status >= 500)
///             .unwrap_or(true)
///     }
/// }
/// ```
pub trait FailureClassifier: Send + Sync + std::fmt::Debug {
    /// Returns `true` if the error should count as a failure
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool;

    /// Returns `true` if the error should be ignored outright
    ///
    /// Checked before [`should_record`](Self::should_record).
    fn should_ignore(&self, _ctx: &FailureContext<'_>) -> bool {
        false
    }

    fn classify(&self, ctx: &FailureContext<'_>) -> Disposition {
        if self.should_ignore(ctx) || !self.should_record(ctx) {
            Disposition::Ignore
        } else {
            Disposition::Record
        }
    }
}

/// Default classifier that records all errors
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl FailureClassifier for DefaultClassifier {
    fn should_record(&self, _ctx: &FailureContext<'_>) -> bool {
        true
    }
}

type Predicate = Box<dyn Fn(&FailureContext<'_>) -> bool + Send + Sync>;

/// Predicate-based classifier using closures
///
/// The record predicate defaults to "record everything" and the ignore
/// predicate to "ignore nothing".
pub struct PredicateClassifier {
    record: Predicate,
    ignore: Option<Predicate>,
}

impl PredicateClassifier {
    /// Create a classifier recording errors that match `record`
    pub fn new<F>(record: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self {
            record: Box::new(record),
            ignore: None,
        }
    }

    /// Create a classifier that records everything except errors matching `ignore`
    pub fn ignoring<F>(ignore: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        Self::new(|_| true).with_ignore(ignore)
    }

    pub fn with_ignore<F>(mut self, ignore: F) -> Self
    where
        F: Fn(&FailureContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.ignore = Some(Box::new(ignore));
        self
    }
}

impl FailureClassifier for PredicateClassifier {
    fn should_record(&self, ctx: &FailureContext<'_>) -> bool {
        (self.record)(ctx)
    }

    fn should_ignore(&self, ctx: &FailureContext<'_>) -> bool {
        self.ignore.as_ref().is_some_and(|ignore| ignore(ctx))
    }
}

impl std::fmt::Debug for PredicateClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("record", &"<closure>")
            .field("ignore", &self.ignore.as_ref().map(|_| "<closure>"))
            .finish()
    }
}
