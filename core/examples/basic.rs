//! Basic circuit breaker usage example

use breaker_events::{CircuitBreaker, CircuitState, EventBus, EventFilter};
use std::time::Duration;

fn main() {
    println!("=== Circuit Breaker Basic Example ===\n");

    let bus = EventBus::new(100, 64);
    let mut events = bus.subscribe(EventFilter::all());

    let circuit = CircuitBreaker::builder("payment_api")
        .count_based_window(4)
        .minimum_number_of_calls(4)
        .failure_rate_threshold(50.0)
        .wait_duration_in_open_state(Duration::from_millis(200))
        .permitted_number_of_calls_in_half_open_state(2)
        .event_bus(bus.clone())
        .build();

    println!("Initial state: {}\n", circuit.state());

    println!("--- Successful calls ---");
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Payment {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ Error: {}", e),
        }
    }
    println!("State: {}\n", circuit.state());

    println!("--- Triggering failures ---");
    for i in 1..=3 {
        match circuit.call(move || Err::<String, _>(format!("Payment failed {}", i))) {
            Ok(_) => println!("✓ Success"),
            Err(e) => println!("✗ {}", e),
        }
    }
    println!("State: {}\n", circuit.state());

    println!("--- Attempting call while open ---");
    match circuit.call(|| Ok::<_, String>("Should be rejected")) {
        Ok(_) => println!("✓ Success"),
        Err(e) => println!("✗ {}", e),
    }
    println!();

    println!("--- Waiting for half-open ---");
    std::thread::sleep(Duration::from_millis(250));
    for i in 1..=2 {
        match circuit.call(move || Ok::<_, String>(format!("Trial {}", i))) {
            Ok(result) => println!("✓ {}", result),
            Err(e) => println!("✗ {}", e),
        }
    }
    assert_eq!(circuit.state(), CircuitState::Closed);
    println!("State: {}\n", circuit.state());

    println!("--- Events ---");
    while let Ok(Some(event)) = events.try_recv() {
        println!("{}", event);
    }

    let metrics = circuit.metrics();
    println!(
        "\nRejected calls: {}, published: {}, dropped: {}",
        metrics.number_of_not_permitted_calls,
        bus.events_published(),
        bus.events_dropped()
    );
}
