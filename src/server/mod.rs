pub mod router;
pub mod state;

use std::sync::Arc;

use crate::agent::AgentHandle;
use crate::config::RelayConfig;
use crate::error::{RelayError, Result};

/// Start the HTTP server with the given configuration and agent.
pub async fn start(config: RelayConfig, agent: AgentHandle) -> Result<()> {
    let bind_addr = config.bind_address();
    tracing::info!(
        agent = %agent.name(),
        model = %config.model,
        isolate_requests = config.isolate_requests,
        "Initialized relay"
    );

    let app_state = state::AppState::new(agent, Arc::new(config));
    let app = router::build(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| RelayError::Server(format!("Failed to bind to {bind_addr}: {e}")))?;

    tracing::info!("Server listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RelayError::Server(format!("Server error: {e}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
