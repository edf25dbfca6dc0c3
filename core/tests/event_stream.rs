use breaker_events::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, EventFilter, EventType,
    RegistryConfig, SlidingWindowType,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn backend_b_config(window_type: SlidingWindowType) -> RegistryConfig {
    RegistryConfig::default().with_instance(
        "backendB",
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_type: window_type,
            sliding_window_size: 2,
            ..Default::default()
        },
    )
}

fn fail_then_succeed(registry: &CircuitBreakerRegistry) {
    let circuit = registry.circuit_breaker("backendB");
    let failed = circuit.call(|| Err::<(), _>("java.io.IOException: BAM!"));
    assert!(failed.is_err());
    let succeeded = circuit.call(|| Ok::<_, String>("Hello World"));
    assert_eq!(succeeded.unwrap(), "Hello World");
}

#[tokio::test]
async fn test_failing_then_succeeding_call_is_recorded() {
    for window_type in [SlidingWindowType::CountBased, SlidingWindowType::TimeBased] {
        let registry = CircuitBreakerRegistry::new(backend_b_config(window_type)).unwrap();
        registry.circuit_breaker("backendA");

        let before = registry.events(Some("backendB"), None).len();
        let before_success = registry
            .events(Some("backendB"), Some(EventType::Success))
            .len();

        fail_then_succeed(&registry);

        let events = registry.events(Some("backendB"), None);
        assert_eq!(events.len(), before + 2);
        assert_eq!(
            registry
                .events(Some("backendB"), Some(EventType::Success))
                .len(),
            before_success + 1
        );
        let types: Vec<EventType> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(types, vec![EventType::Error, EventType::Success]);
        assert_eq!(registry.state("backendB"), Ok(CircuitState::Closed));
        assert!(registry.events(Some("backendA"), None).is_empty());
    }
}

#[tokio::test]
async fn test_stream_of_all_events() {
    let registry =
        CircuitBreakerRegistry::new(backend_b_config(SlidingWindowType::CountBased)).unwrap();
    let stream = registry.stream(EventFilter::all()).with_limit(3);

    fail_then_succeed(&registry);

    // Only two events exist; the stream waits for a third until the timeout
    let collected = timeout(
        Duration::from_millis(200),
        stream.take_until(tokio::time::sleep(Duration::from_millis(100))).collect::<Vec<_>>(),
    )
    .await
    .expect("take_until bounds the wait");

    let types: Vec<EventType> = collected.iter().map(|e| e.event_type()).collect();
    assert_eq!(types, vec![EventType::Error, EventType::Success]);
}

#[tokio::test]
async fn test_stream_of_one_breaker_and_type() {
    let registry =
        CircuitBreakerRegistry::new(backend_b_config(SlidingWindowType::CountBased)).unwrap();
    let mut stream = registry
        .stream(EventFilter::name_and_type("backendB", EventType::Success))
        .with_limit(3);

    fail_then_succeed(&registry);
    registry.circuit_breaker("backendA").on_success(Duration::ZERO);

    let first = timeout(Duration::from_millis(100), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.circuit_breaker_name(), "backendB");
    assert_eq!(first.event_type(), EventType::Success);

    assert!(
        timeout(Duration::from_millis(50), stream.next())
            .await
            .is_err(),
        "No further matching events"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_slow_subscribers_do_not_block_callers() {
    let config = RegistryConfig {
        subscriber_buffer_size: 8,
        ..Default::default()
    };
    let registry = CircuitBreakerRegistry::new(config).unwrap();

    // Neither is read while the callers run
    let stalled = registry.subscribe(EventFilter::all());
    let mut late = registry.subscribe(EventFilter::name("svc-0"));

    let callers: Vec<_> = (0..4)
        .map(|i| {
            let registry = registry.clone();
            tokio::task::spawn_blocking(move || {
                let circuit = registry.circuit_breaker(&format!("svc-{}", i));
                for _ in 0..500 {
                    let _ = circuit.call(|| Ok::<_, String>(()));
                }
            })
        })
        .collect();

    for caller in callers {
        timeout(Duration::from_secs(5), caller)
            .await
            .expect("callers must not block")
            .unwrap();
    }

    let mut received = 0;
    while let Ok(Some(_)) = late.try_recv() {
        received += 1;
    }

    assert_eq!(received, 8);
    assert_eq!(late.dropped_events(), 500 - 8);
    assert_eq!(stalled.dropped_events(), 2000 - 8);
    assert_eq!(registry.event_bus().events_published(), 2000);
    assert_eq!(registry.event_bus().events_dropped(), (2000 - 8) + (500 - 8));
}

#[tokio::test]
async fn test_shutdown_ends_streams_and_keeps_history() {
    let registry = CircuitBreakerRegistry::new(RegistryConfig::default()).unwrap();
    let stream = registry.stream(EventFilter::all());
    let consumer = tokio::spawn(stream.collect::<Vec<_>>());

    let circuit = registry.circuit_breaker("a");
    circuit.on_success(Duration::from_millis(1));
    registry.shutdown();
    circuit.on_success(Duration::from_millis(1));

    let seen = timeout(Duration::from_secs(1), consumer)
        .await
        .expect("stream should end on shutdown")
        .unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(registry.events(Some("a"), None).len(), 2);
    assert_eq!(registry.event_bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_dropped_stream_is_unsubscribed() {
    let registry = Arc::new(CircuitBreakerRegistry::new(RegistryConfig::default()).unwrap());
    let stream = registry.stream(EventFilter::all());
    assert_eq!(registry.event_bus().subscriber_count(), 1);

    let handle = tokio::spawn(async move {
        let mut stream = stream;
        stream.next().await
    });
    handle.abort();
    let _ = handle.await;

    assert_eq!(registry.event_bus().subscriber_count(), 0);
}
