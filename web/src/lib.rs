//! HTTP surface for circuit breaker events
//!
//! | Route | Response |
//! |-------|----------|
//! | `GET /circuitbreakerevents` | retained events of every breaker |
//! | `GET /circuitbreakerevents/{name}` | retained events of one breaker |
//! | `GET /circuitbreakerevents/{name}/{eventType}` | retained events of one breaker and type |
//! | `GET /stream/circuitbreakerevents[/{name}[/{eventType}]]` | live `text/event-stream` |
//! | `GET /circuitbreakers[/{name}]` | current state and metrics |

pub mod error;
pub mod handlers;
pub mod settings;

use axum::{Router, routing::get};
use breaker_events::CircuitBreakerRegistry;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: CircuitBreakerRegistry,
    pub keep_alive_interval: Duration,
}

impl AppState {
    pub fn new(registry: CircuitBreakerRegistry, keep_alive_interval: Duration) -> Self {
        Self {
            registry,
            keep_alive_interval,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/circuitbreakerevents", get(handlers::all_events))
        .route("/circuitbreakerevents/{name}", get(handlers::events_by_name))
        .route(
            "/circuitbreakerevents/{name}/{event_type}",
            get(handlers::events_by_name_and_type),
        )
        .route("/stream/circuitbreakerevents", get(handlers::stream_all))
        .route(
            "/stream/circuitbreakerevents/{name}",
            get(handlers::stream_by_name),
        )
        .route(
            "/stream/circuitbreakerevents/{name}/{event_type}",
            get(handlers::stream_by_name_and_type),
        )
        .route("/circuitbreakers", get(handlers::circuit_breakers))
        .route("/circuitbreakers/{name}", get(handlers::circuit_breaker))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` resolves
///
/// Open event streams are ended once shutdown starts so the server can drain.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let registry = state.registry.clone();
    let app = router(state);

    info!(addr = ?listener.local_addr().ok(), "Circuit breaker events server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Shutting down, closing event streams");
            registry.shutdown();
        })
        .await
}
