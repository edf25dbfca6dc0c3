//! Serializable views of circuit breaker events

use crate::events::{CircuitBreakerEvent, EventKind, EventType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerEventDto {
    pub circuit_breaker_name: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub creation_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_in_ms: Option<u64>,
    /// e.g. `CLOSED_TO_OPEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_transition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_rate: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slow_call_rate: Option<f32>,
}

impl From<&CircuitBreakerEvent> for CircuitBreakerEventDto {
    fn from(event: &CircuitBreakerEvent) -> Self {
        let mut dto = Self {
            circuit_breaker_name: event.circuit_breaker_name().to_string(),
            event_type: event.event_type(),
            creation_time: event.creation_time(),
            error_message: event.error_message().map(str::to_string),
            duration_in_ms: event
                .elapsed()
                .map(|d| d.as_millis().min(u64::MAX as u128) as u64),
            state_transition: None,
            failure_rate: None,
            slow_call_rate: None,
        };

        match event.kind() {
            EventKind::StateTransition { from, to } => {
                dto.state_transition = Some(format!("{}_TO_{}", from, to));
            }
            EventKind::FailureRateExceeded { failure_rate } => {
                dto.failure_rate = Some(*failure_rate);
            }
            EventKind::SlowCallRateExceeded { slow_call_rate } => {
                dto.slow_call_rate = Some(*slow_call_rate);
            }
            _ => {}
        }

        dto
    }
}

impl CircuitBreakerEventDto {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Response body of a history query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerEventsResponse {
    pub circuit_breaker_events: Vec<CircuitBreakerEventDto>,
}

impl CircuitBreakerEventsResponse {
    pub fn from_events(events: &[Arc<CircuitBreakerEvent>]) -> Self {
        Self {
            circuit_breaker_events: events.iter().map(|e| e.as_ref().into()).collect(),
        }
    }
}
