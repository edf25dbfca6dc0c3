//! Named circuit breakers sharing one event bus and history
//!
//! Breakers are created on first reference with the configuration
//! registered for their name (or the defaults) and live until removed.

use crate::{
    bus::{EventBus, Subscription},
    circuit::CircuitBreaker,
    classifier::FailureClassifier,
    clock::{Clock, MonotonicClock},
    config::{CircuitBreakerConfig, RegistryConfig},
    errors::{CallNotPermitted, RegistryError},
    events::{CircuitBreakerEvent, EventFilter, EventType},
    history::EventHistory,
    state::CircuitState,
    stream::EventStream,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Outcome of a call executed outside of [`CircuitBreaker::call`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    Success { duration: Duration },
    Failure { duration: Duration, message: String },
}

#[derive(Debug)]
struct RegistryInner {
    config: RegistryConfig,
    breakers: DashMap<String, CircuitBreaker>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
}

/// Registry of circuit breakers keyed by name
///
/// Cheap to clone; clones share the same breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    inner: Arc<RegistryInner>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a registry whose breakers measure time with `clock`
    pub fn with_clock(config: RegistryConfig, clock: Arc<dyn Clock>) -> Result<Self, RegistryError> {
        config.validate()?;

        let history = Arc::new(EventHistory::new(
            config.event_buffer_size,
            config.global_event_buffer_size,
        ));
        let bus = EventBus::with_history(history, config.subscriber_buffer_size);

        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                breakers: DashMap::new(),
                bus,
                clock,
            }),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn build(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
        classifier: Option<Arc<dyn FailureClassifier>>,
    ) -> CircuitBreaker {
        let mut builder = CircuitBreaker::builder(name)
            .config(config)
            .clock(Arc::clone(&self.inner.clock))
            .event_bus(Arc::clone(&self.inner.bus));
        if let Some(classifier) = classifier {
            builder = builder.failure_classifier(classifier);
        }
        builder.build()
    }

    /// Get the breaker for `name`, creating it on first reference
    pub fn circuit_breaker(&self, name: &str) -> CircuitBreaker {
        if let Some(breaker) = self.inner.breakers.get(name) {
            return breaker.value().clone();
        }

        self.inner
            .breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = self.inner.config.config_for(name).clone();
                self.build(name, config, None)
            })
            .value()
            .clone()
    }

    /// Explicitly register a breaker with its own configuration
    pub fn register(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
        classifier: Option<Arc<dyn FailureClassifier>>,
    ) -> Result<CircuitBreaker, RegistryError> {
        config.validate()?;

        match self.inner.breakers.entry(name.to_string()) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyExists(name.to_string())),
            Entry::Vacant(entry) => {
                let breaker = self.build(name, config, classifier);
                entry.insert(breaker.clone());
                info!(circuit = %name, "Circuit breaker registered");
                Ok(breaker)
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<CircuitBreaker> {
        self.inner.breakers.get(name).map(|b| b.value().clone())
    }

    /// Deregister a breaker; its history is kept
    pub fn remove(&self, name: &str) -> Option<CircuitBreaker> {
        let removed = self.inner.breakers.remove(name).map(|(_, b)| b);
        if removed.is_some() {
            info!(circuit = %name, "Circuit breaker removed");
        }
        removed
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .breakers
            .iter()
            .map(|b| b.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Registered breakers, sorted by name
    pub fn all(&self) -> Vec<CircuitBreaker> {
        let mut breakers: Vec<CircuitBreaker> = self
            .inner
            .breakers
            .iter()
            .map(|b| b.value().clone())
            .collect();
        breakers.sort_by(|a, b| a.name().cmp(b.name()));
        breakers
    }

    fn existing(&self, name: &str) -> Result<CircuitBreaker, RegistryError> {
        self.find(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn state(&self, name: &str) -> Result<CircuitState, RegistryError> {
        Ok(self.existing(name)?.state())
    }

    pub fn acquire_permission(&self, name: &str) -> Result<(), CallNotPermitted> {
        self.circuit_breaker(name).acquire_permission()
    }

    pub fn record_outcome(&self, name: &str, outcome: CallOutcome) {
        let breaker = self.circuit_breaker(name);
        match outcome {
            CallOutcome::Success { duration } => breaker.on_success(duration),
            CallOutcome::Failure { duration, message } => {
                breaker.on_error(duration, &message);
            }
        }
    }

    pub fn transition_to(&self, name: &str, state: CircuitState) -> Result<(), RegistryError> {
        Ok(self.existing(name)?.transition_to(state)?)
    }

    pub fn reset(&self, name: &str) -> Result<(), RegistryError> {
        self.existing(name)?.reset();
        Ok(())
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.inner.bus
    }

    pub fn history(&self) -> &Arc<EventHistory> {
        self.inner.bus.history()
    }

    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    pub fn stream(&self, filter: EventFilter) -> EventStream {
        self.subscribe(filter).into_stream()
    }

    /// Retained events, oldest first
    pub fn events(
        &self,
        name: Option<&str>,
        event_type: Option<EventType>,
    ) -> Vec<Arc<CircuitBreakerEvent>> {
        self.history().query(name, event_type)
    }

    /// End every live subscription
    pub fn shutdown(&self) {
        self.inner.bus.shutdown();
    }
}
