//! Request handlers
//!
//! History endpoints answer with a point-in-time JSON snapshot. Stream
//! endpoints hold one bus subscription per connection and end it when the
//! client disconnects.

use crate::{AppState, error::ApiResult};
use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use breaker_events::{
    CircuitBreaker, CircuitBreakerEventDto, CircuitBreakerEventsResponse, CircuitState,
    EventFilter, EventType, RegistryError,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// `GET /circuitbreakerevents`
pub async fn all_events(State(state): State<AppState>) -> Json<CircuitBreakerEventsResponse> {
    history(&state, None, None)
}

/// `GET /circuitbreakerevents/{name}`
pub async fn events_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Json<CircuitBreakerEventsResponse> {
    history(&state, Some(&name), None)
}

/// `GET /circuitbreakerevents/{name}/{event_type}`
pub async fn events_by_name_and_type(
    State(state): State<AppState>,
    Path((name, event_type)): Path<(String, String)>,
) -> ApiResult<Json<CircuitBreakerEventsResponse>> {
    let event_type: EventType = event_type.parse()?;
    Ok(history(&state, Some(&name), Some(event_type)))
}

fn history(
    state: &AppState,
    name: Option<&str>,
    event_type: Option<EventType>,
) -> Json<CircuitBreakerEventsResponse> {
    let events = state.registry.events(name, event_type);
    Json(CircuitBreakerEventsResponse::from_events(&events))
}

/// `GET /stream/circuitbreakerevents`
pub async fn stream_all(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    sse(state, EventFilter::all())
}

/// `GET /stream/circuitbreakerevents/{name}`
pub async fn stream_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    sse(state, EventFilter::name(name))
}

/// `GET /stream/circuitbreakerevents/{name}/{event_type}`
pub async fn stream_by_name_and_type(
    State(state): State<AppState>,
    Path((name, event_type)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let event_type: EventType = event_type.parse()?;
    Ok(sse(state, EventFilter::name_and_type(name, event_type)))
}

fn sse(
    state: AppState,
    filter: EventFilter,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!(name = ?filter.name, event_type = ?filter.event_type, "Event stream opened");

    let events = state.registry.stream(filter).map(|event| {
        let dto = CircuitBreakerEventDto::from(event.as_ref());
        Event::default()
            .event(dto.event_type.as_str())
            .id(event.sequence().to_string())
            .json_data(&dto)
    });

    Sse::new(events).keep_alive(KeepAlive::new().interval(state.keep_alive_interval))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_rate: f32,
    pub slow_call_rate: f32,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub slow_calls: usize,
    pub not_permitted_calls: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakersResponse {
    pub circuit_breakers: Vec<CircuitBreakerStatus>,
}

fn status(breaker: &CircuitBreaker) -> CircuitBreakerStatus {
    let metrics = breaker.metrics();
    CircuitBreakerStatus {
        name: breaker.name().to_string(),
        state: metrics.state,
        failure_rate: metrics.failure_rate,
        slow_call_rate: metrics.slow_call_rate,
        buffered_calls: metrics.number_of_buffered_calls,
        failed_calls: metrics.number_of_failed_calls,
        slow_calls: metrics.number_of_slow_calls,
        not_permitted_calls: metrics.number_of_not_permitted_calls,
    }
}

/// `GET /circuitbreakers`
pub async fn circuit_breakers(State(state): State<AppState>) -> Json<CircuitBreakersResponse> {
    Json(CircuitBreakersResponse {
        circuit_breakers: state.registry.all().iter().map(status).collect(),
    })
}

/// `GET /circuitbreakers/{name}`
pub async fn circuit_breaker(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<CircuitBreakerStatus>> {
    let breaker = state
        .registry
        .find(&name)
        .ok_or(RegistryError::NotFound(name))?;
    Ok(Json(status(&breaker)))
}
