//! Circuit breaker events
//!
//! Every recorded occurrence (call outcome, rejection, state transition,
//! threshold crossing, reset) produces exactly one [`CircuitBreakerEvent`].
//! Events are immutable once published and are shared as `Arc`s between the
//! history store and every subscriber.

use crate::state::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Event type used for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Success,
    Error,
    IgnoredError,
    NotPermitted,
    StateTransition,
    Reset,
    FailureRateExceeded,
    SlowCallRateExceeded,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::Success,
        EventType::Error,
        EventType::IgnoredError,
        EventType::NotPermitted,
        EventType::StateTransition,
        EventType::Reset,
        EventType::FailureRateExceeded,
        EventType::SlowCallRateExceeded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Success => "SUCCESS",
            EventType::Error => "ERROR",
            EventType::IgnoredError => "IGNORED_ERROR",
            EventType::NotPermitted => "NOT_PERMITTED",
            EventType::StateTransition => "STATE_TRANSITION",
            EventType::Reset => "RESET",
            EventType::FailureRateExceeded => "FAILURE_RATE_EXCEEDED",
            EventType::SlowCallRateExceeded => "SLOW_CALL_RATE_EXCEEDED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown circuit breaker event type '{0}'")]
pub struct ParseEventTypeError(pub String);

impl FromStr for EventType {
    type Err = ParseEventTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseEventTypeError(s.to_string()))
    }
}

/// What happened, with the data specific to that event type
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Success {
        elapsed: Duration,
    },
    Error {
        elapsed: Duration,
        message: String,
    },
    IgnoredError {
        elapsed: Duration,
        message: String,
    },
    NotPermitted,
    StateTransition {
        from: CircuitState,
        to: CircuitState,
    },
    Reset,
    FailureRateExceeded {
        failure_rate: f32,
    },
    SlowCallRateExceeded {
        slow_call_rate: f32,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Success { .. } => EventType::Success,
            EventKind::Error { .. } => EventType::Error,
            EventKind::IgnoredError { .. } => EventType::IgnoredError,
            EventKind::NotPermitted => EventType::NotPermitted,
            EventKind::StateTransition { .. } => EventType::StateTransition,
            EventKind::Reset => EventType::Reset,
            EventKind::FailureRateExceeded { .. } => EventType::FailureRateExceeded,
            EventKind::SlowCallRateExceeded { .. } => EventType::SlowCallRateExceeded,
        }
    }
}

/// A single event emitted by a circuit breaker
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerEvent {
    sequence: u64,
    circuit_breaker_name: String,
    kind: EventKind,
    creation_time: DateTime<Utc>,
}

impl CircuitBreakerEvent {
    pub fn new(circuit_breaker_name: impl Into<String>, kind: EventKind) -> Self {
        Self {
            sequence: 0,
            circuit_breaker_name: circuit_breaker_name.into(),
            kind,
            creation_time: Utc::now(),
        }
    }

    /// Bus-wide publish order (0 until published)
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn circuit_breaker_name(&self) -> &str {
        &self.circuit_breaker_name
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn creation_time(&self) -> DateTime<Utc> {
        self.creation_time
    }

    pub fn elapsed(&self) -> Option<Duration> {
        match &self.kind {
            EventKind::Success { elapsed }
            | EventKind::Error { elapsed, .. }
            | EventKind::IgnoredError { elapsed, .. } => Some(*elapsed),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Error { message, .. } | EventKind::IgnoredError { message, .. } => {
                Some(message)
            }
            _ => None,
        }
    }

    pub fn state_transition(&self) -> Option<(CircuitState, CircuitState)> {
        match self.kind {
            EventKind::StateTransition { from, to } => Some((from, to)),
            _ => None,
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: CircuitBreaker '{}' ",
            self.creation_time.to_rfc3339(),
            self.circuit_breaker_name
        )?;
        match &self.kind {
            EventKind::Success { elapsed } => {
                write!(f, "recorded a successful call. Elapsed time: {} ms", elapsed.as_millis())
            }
            EventKind::Error { elapsed, message } => write!(
                f,
                "recorded an error: '{}'. Elapsed time: {} ms",
                message,
                elapsed.as_millis()
            ),
            EventKind::IgnoredError { elapsed, message } => write!(
                f,
                "recorded an error which has been ignored: '{}'. Elapsed time: {} ms",
                message,
                elapsed.as_millis()
            ),
            EventKind::NotPermitted => f.write_str("recorded a call which was not permitted."),
            EventKind::StateTransition { from, to } => {
                write!(f, "changed state from {} to {}", from, to)
            }
            EventKind::Reset => f.write_str("reset"),
            EventKind::FailureRateExceeded { failure_rate } => {
                write!(f, "exceeded failure rate threshold. Current failure rate: {}", failure_rate)
            }
            EventKind::SlowCallRateExceeded { slow_call_rate } => write!(
                f,
                "exceeded slow call rate threshold. Current slow call rate: {}",
                slow_call_rate
            ),
        }
    }
}

/// Subscription filter over (name, type)
///
/// No name matches every circuit breaker; no type matches every event type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub name: Option<String>,
    pub event_type: Option<EventType>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            event_type: None,
        }
    }

    pub fn name_and_type(name: impl Into<String>, event_type: EventType) -> Self {
        Self {
            name: Some(name.into()),
            event_type: Some(event_type),
        }
    }

    pub fn event_type(event_type: EventType) -> Self {
        Self {
            name: None,
            event_type: Some(event_type),
        }
    }

    pub fn matches(&self, event: &CircuitBreakerEvent) -> bool {
        self.name
            .as_deref()
            .is_none_or(|name| name == event.circuit_breaker_name())
            && self.event_type.is_none_or(|t| t == event.event_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(name: &str) -> CircuitBreakerEvent {
        CircuitBreakerEvent::new(
            name,
            EventKind::Success {
                elapsed: Duration::from_millis(5),
            },
        )
    }

    #[test]
    fn test_event_type_parse_round_trip() {
        for t in EventType::ALL {
            assert_eq!(t.as_str().parse::<EventType>(), Ok(t));
            assert_eq!(t.as_str().to_lowercase().parse::<EventType>(), Ok(t));
        }
        assert!("EXPLODED".parse::<EventType>().is_err());
    }

    #[test]
    fn test_filter_matching() {
        let a = success("backendA");
        let b = success("backendB");
        let b_error = CircuitBreakerEvent::new(
            "backendB",
            EventKind::Error {
                elapsed: Duration::ZERO,
                message: "boom".to_string(),
            },
        );

        assert!(EventFilter::all().matches(&a));
        assert!(EventFilter::all().matches(&b_error));

        let by_name = EventFilter::name("backendB");
        assert!(!by_name.matches(&a));
        assert!(by_name.matches(&b));
        assert!(by_name.matches(&b_error));

        let by_pair = EventFilter::name_and_type("backendB", EventType::Success);
        assert!(by_pair.matches(&b));
        assert!(!by_pair.matches(&b_error));
        assert!(!by_pair.matches(&a));

        let by_type = EventFilter::event_type(EventType::Success);
        assert!(by_type.matches(&a));
        assert!(!by_type.matches(&b_error));
    }

    #[test]
    fn test_accessors() {
        let event = CircuitBreakerEvent::new(
            "backendA",
            EventKind::StateTransition {
                from: CircuitState::Closed,
                to: CircuitState::Open,
            },
        );

        assert_eq!(event.sequence(), 0);
        assert_eq!(event.event_type(), EventType::StateTransition);
        assert_eq!(
            event.state_transition(),
            Some((CircuitState::Closed, CircuitState::Open))
        );
        assert_eq!(event.elapsed(), None);
        assert!(event.to_string().contains("changed state from CLOSED to OPEN"));
    }
}
