use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use breaker_events::{
    CircuitBreakerConfig, CircuitBreakerEventDto, CircuitBreakerEventsResponse,
    CircuitBreakerRegistry, CircuitState, EventType, RegistryConfig,
};
use breaker_events_web::handlers::{CircuitBreakerStatus, CircuitBreakersResponse};
use breaker_events_web::{AppState, router};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tower::ServiceExt;

fn registry() -> CircuitBreakerRegistry {
    let config = RegistryConfig::default().with_instance(
        "backendB",
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 2,
            ..Default::default()
        },
    );
    let registry = CircuitBreakerRegistry::new(config).expect("registry");
    registry.circuit_breaker("backendA");
    registry.circuit_breaker("backendB");
    registry
}

fn app(registry: &CircuitBreakerRegistry) -> Router {
    router(AppState::new(registry.clone(), Duration::from_secs(15)))
}

fn fail_then_succeed(registry: &CircuitBreakerRegistry) {
    let circuit = registry.circuit_breaker("backendB");
    let _ = circuit.call(|| Err::<(), _>("java.io.IOException: BAM!"));
    let _ = circuit.call(|| Ok::<_, String>("Hello World"));
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response")
}

async fn get_json<T: DeserializeOwned>(app: &Router, uri: &str) -> (StatusCode, T) {
    let response = get(app, uri).await;
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    (status, serde_json::from_slice(&body).expect("json body"))
}

async fn event_count(app: &Router, uri: &str) -> usize {
    let (status, body): (_, CircuitBreakerEventsResponse) = get_json(app, uri).await;
    assert_eq!(status, StatusCode::OK);
    body.circuit_breaker_events.len()
}

/// Read up to `limit` SSE `data:` payloads, giving up after `wait`
async fn read_sse(body: Body, limit: usize, wait: Duration) -> Vec<CircuitBreakerEventDto> {
    let mut stream = body.into_data_stream();
    let deadline = tokio::time::Instant::now() + wait;
    let mut buffer = String::new();
    let mut events = Vec::new();

    while events.len() < limit {
        let chunk = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            _ => break,
        };
        buffer.push_str(std::str::from_utf8(&chunk).expect("utf8"));

        while let Some(end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..end + 2).collect();
            for line in frame.lines() {
                if let Some(data) = line.strip_prefix("data:") {
                    events.push(serde_json::from_str(data.trim()).expect("event json"));
                }
            }
        }
    }

    events.truncate(limit);
    events
}

#[tokio::test]
async fn test_history_endpoints_grow_with_calls() {
    let registry = registry();
    let app = app(&registry);

    let all_before = event_count(&app, "/circuitbreakerevents").await;
    let named_before = event_count(&app, "/circuitbreakerevents/backendB").await;
    let success_before = event_count(&app, "/circuitbreakerevents/backendB/SUCCESS").await;

    fail_then_succeed(&registry);

    assert_eq!(event_count(&app, "/circuitbreakerevents").await, all_before + 2);
    assert_eq!(
        event_count(&app, "/circuitbreakerevents/backendB").await,
        named_before + 2
    );
    assert_eq!(
        event_count(&app, "/circuitbreakerevents/backendB/SUCCESS").await,
        success_before + 1
    );
    assert_eq!(event_count(&app, "/circuitbreakerevents/backendA").await, 0);
}

#[tokio::test]
async fn test_history_event_body() {
    let registry = registry();
    let app = app(&registry);
    fail_then_succeed(&registry);

    let (_, body): (_, CircuitBreakerEventsResponse) =
        get_json(&app, "/circuitbreakerevents/backendB").await;
    let events = body.circuit_breaker_events;

    assert_eq!(events[0].circuit_breaker_name, "backendB");
    assert_eq!(events[0].event_type, EventType::Error);
    assert_eq!(
        events[0].error_message.as_deref(),
        Some("java.io.IOException: BAM!")
    );
    assert_eq!(events[1].event_type, EventType::Success);
    assert!(events[1].error_message.is_none());
}

#[tokio::test]
async fn test_unknown_event_type_is_bad_request() {
    let registry = registry();
    let app = app(&registry);

    let (status, body): (_, serde_json::Value) =
        get_json(&app, "/circuitbreakerevents/backendB/EXPLODED").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_EVENT_TYPE");

    let response = get(&app, "/stream/circuitbreakerevents/backendB/EXPLODED").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(registry.event_bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_stream_of_all_events() {
    let registry = registry();
    let app = app(&registry);

    let response = get(&app, "/stream/circuitbreakerevents").await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    assert!(content_type.starts_with("text/event-stream"));

    fail_then_succeed(&registry);

    let events = read_sse(response.into_body(), 3, Duration::from_millis(300)).await;
    let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
    assert_eq!(types, vec![EventType::Error, EventType::Success]);
}

#[tokio::test]
async fn test_stream_of_one_breaker() {
    let registry = registry();
    let app = app(&registry);

    let response = get(&app, "/stream/circuitbreakerevents/backendB").await;
    registry
        .circuit_breaker("backendA")
        .on_success(Duration::from_millis(1));
    fail_then_succeed(&registry);

    let events = read_sse(response.into_body(), 3, Duration::from_millis(300)).await;
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.circuit_breaker_name == "backendB"));
}

#[tokio::test]
async fn test_stream_of_one_breaker_and_type() {
    let registry = registry();
    let app = app(&registry);

    let response = get(&app, "/stream/circuitbreakerevents/backendB/SUCCESS").await;
    fail_then_succeed(&registry);

    let events = read_sse(response.into_body(), 3, Duration::from_millis(300)).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Success);
    assert!(events[0].duration_in_ms.is_some());
}

#[tokio::test]
async fn test_closed_connection_unsubscribes() {
    let registry = registry();
    let app = app(&registry);

    let response = get(&app, "/stream/circuitbreakerevents").await;
    assert_eq!(registry.event_bus().subscriber_count(), 1);

    drop(response);
    assert_eq!(registry.event_bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let registry = registry();
    let app = app(&registry);

    let response = get(&app, "/stream/circuitbreakerevents").await;
    fail_then_succeed(&registry);
    registry.shutdown();

    let body = tokio::time::timeout(
        Duration::from_secs(1),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("stream ends after shutdown")
    .expect("read body");
    let text = String::from_utf8(body.to_vec()).expect("utf8");
    assert_eq!(text.matches("data:").count(), 2);
}

#[tokio::test]
async fn test_circuit_breaker_status() {
    let registry = registry();
    let app = app(&registry);
    fail_then_succeed(&registry);

    let (status, body): (_, CircuitBreakersResponse) = get_json(&app, "/circuitbreakers").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .circuit_breakers
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    assert_eq!(names, vec!["backendA", "backendB"]);

    let (status, backend_b): (_, CircuitBreakerStatus) =
        get_json(&app, "/circuitbreakers/backendB").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(backend_b.state, CircuitState::Closed);
    assert_eq!(backend_b.buffered_calls, 2);
    assert_eq!(backend_b.failed_calls, 1);
    assert_eq!(backend_b.failure_rate, 50.0);

    let (status, body): (_, serde_json::Value) = get_json(&app, "/circuitbreakers/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "CIRCUIT_BREAKER_NOT_FOUND");
}
