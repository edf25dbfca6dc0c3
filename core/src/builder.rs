//! Builder API for ergonomic circuit breaker configuration

use crate::{
    bus::{DEFAULT_SUBSCRIBER_BUFFER_SIZE, EventBus},
    circuit::{CircuitBreaker, CircuitContext},
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    config::{CircuitBreakerConfig, ConfigError, SlidingWindowType},
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder {
    name: String,
    config: CircuitBreakerConfig,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier>>,
    bus: Option<Arc<EventBus>>,
}

impl CircuitBuilder {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: CircuitBreakerConfig::default(),
            clock: None,
            failure_classifier: None,
            bus: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config = config;
        self
    }

    /// Failure rate in percent above which the circuit opens
    pub fn failure_rate_threshold(mut self, percent: f32) -> Self {
        self.config.failure_rate_threshold = percent.clamp(f32::MIN_POSITIVE, 100.0);
        self
    }

    /// Slow call rate in percent above which the circuit opens
    pub fn slow_call_rate_threshold(mut self, percent: f32) -> Self {
        self.config.slow_call_rate_threshold = percent.clamp(f32::MIN_POSITIVE, 100.0);
        self
    }

    pub fn slow_call_duration_threshold(mut self, duration: Duration) -> Self {
        self.config.slow_call_duration_threshold = duration;
        self
    }

    /// Evaluate the last `size` calls
    pub fn count_based_window(mut self, size: usize) -> Self {
        self.config.sliding_window_type = SlidingWindowType::CountBased;
        self.config.sliding_window_size = size.max(1);
        self
    }

    /// Evaluate calls from the last `seconds` seconds
    pub fn time_based_window(mut self, seconds: usize) -> Self {
        self.config.sliding_window_type = SlidingWindowType::TimeBased;
        self.config.sliding_window_size = seconds.max(1);
        self
    }

    pub fn minimum_number_of_calls(mut self, calls: usize) -> Self {
        self.config.minimum_number_of_calls = calls.max(1);
        self
    }

    pub fn wait_duration_in_open_state(mut self, duration: Duration) -> Self {
        self.config.wait_duration_in_open_state = duration.max(Duration::from_millis(1));
        self
    }

    /// Grow the open wait by `multiplier` for each consecutive re-open
    pub fn wait_interval_multiplier(mut self, multiplier: f64) -> Self {
        self.config.wait_interval_multiplier = multiplier.max(1.0);
        self
    }

    pub fn max_wait_duration_in_open_state(mut self, duration: Duration) -> Self {
        self.config.max_wait_duration_in_open_state = Some(duration);
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: timeout * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor.clamp(0.0, 1.0);
        self
    }

    pub fn permitted_number_of_calls_in_half_open_state(mut self, calls: usize) -> Self {
        self.config.permitted_number_of_calls_in_half_open_state = calls.max(1);
        self
    }

    pub fn max_wait_duration_in_half_open_state(mut self, duration: Duration) -> Self {
        self.config.max_wait_duration_in_half_open_state = duration;
        self
    }

    pub fn automatic_transition_from_open_to_half_open(mut self, enabled: bool) -> Self {
        self.config.automatic_transition_from_open_to_half_open_enabled = enabled;
        self
    }

    /// Use a custom time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to decide which errors count toward the failure rate
    ///
    /// Errors it ignores are published as IGNORED_ERROR and never affect
    /// the circuit state.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breaker_events::{CircuitBreaker, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(|ctx| {
    ///         // Only count slow errors
    ///         ctx.duration > Duration::from_secs(1)
    ///     })))
    ///     .build();
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Publish events to a shared bus
    ///
    /// Without one the breaker gets a private bus.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the circuit breaker after validating its configuration
    pub fn try_build(self) -> Result<CircuitBreaker, ConfigError> {
        self.config.validate()?;
        Ok(self.build())
    }

    /// Build the circuit breaker
    pub fn build(self) -> CircuitBreaker {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let bus = self
            .bus
            .unwrap_or_else(|| EventBus::new(100, DEFAULT_SUBSCRIBER_BUFFER_SIZE));

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            clock,
        };

        CircuitBreaker::with_context(context, self.failure_classifier, bus)
    }
}
