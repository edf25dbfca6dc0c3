use breaker_events::CircuitBreakerRegistry;
use breaker_events_web::{AppState, serve, settings};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = settings::Settings::load()?;
    settings::init_tracing(&settings.log_level);

    let registry = CircuitBreakerRegistry::new(settings.circuit_breakers.clone())?;
    for name in settings.circuit_breakers.instances.keys() {
        registry.circuit_breaker(name);
    }
    info!(breakers = ?registry.names(), "Circuit breaker registry ready");

    let listener = tokio::net::TcpListener::bind(&settings.listen_addr).await?;
    let state = AppState::new(registry, settings.keep_alive_interval());

    serve(listener, state, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler, serving until killed");
        std::future::pending::<()>().await;
    }
    warn!("Received shutdown signal");
}
