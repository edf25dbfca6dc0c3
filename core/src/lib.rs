//! breaker-events - Circuit breakers with an observable event stream
//!
//! This crate provides:
//! - A circuit breaker state machine (Closed, Open, HalfOpen plus the
//!   administrative Disabled, ForcedOpen and MetricsOnly states) over a
//!   count-based or time-based sliding window
//! - An event bus fanning every outcome and transition out to bounded,
//!   non-blocking subscriptions
//! - A bounded per-name event history
//! - A `Stream` adapter for feeding server-sent event endpoints
//! - A registry creating breakers by name on first reference
//!
//! # Example
//!
//! ```rust
//! use breaker_events::{CircuitBreakerRegistry, EventFilter, EventType, RegistryConfig};
//!
//! let registry = CircuitBreakerRegistry::new(RegistryConfig::default()).unwrap();
//! let circuit = registry.circuit_breaker("backendA");
//! let mut errors = registry.subscribe(EventFilter::name_and_type("backendA", EventType::Error));
//!
//! let result = circuit.call(|| Err::<(), _>("connection refused"));
//! assert!(result.is_err());
//!
//! let event = errors.try_recv().unwrap().unwrap();
//! assert_eq!(event.error_message(), Some("connection refused"));
//! assert_eq!(registry.events(Some("backendA"), None).len(), 1);
//! ```

pub mod builder;
pub mod bus;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dto;
pub mod errors;
pub mod events;
pub mod history;
pub mod permits;
pub mod registry;
pub mod state;
pub mod stream;
pub mod window;

pub use builder::CircuitBuilder;
pub use bus::{EventBus, Subscription, SubscriptionError, SubscriptionId};
pub use circuit::{CallOptions, CircuitBreaker, CircuitMetrics, FallbackContext, IntoCallOptions};
pub use classifier::{
    DefaultClassifier, Disposition, FailureClassifier, FailureContext, PredicateClassifier,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{CircuitBreakerConfig, ConfigError, RegistryConfig, SlidingWindowType};
pub use dto::{CircuitBreakerEventDto, CircuitBreakerEventsResponse};
pub use errors::{CallNotPermitted, CircuitError, RegistryError, TransitionError};
pub use events::{CircuitBreakerEvent, EventFilter, EventKind, EventType, ParseEventTypeError};
pub use history::EventHistory;
pub use registry::{CallOutcome, CircuitBreakerRegistry};
pub use state::{CircuitState, ParseStateError};
pub use stream::EventStream;
pub use window::{Outcome, SlidingWindow, WindowSnapshot};
