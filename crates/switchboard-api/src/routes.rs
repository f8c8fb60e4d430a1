//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use switchboard_core::SwitchboardError;

use crate::handlers;
use crate::state::AppState;

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/actions",
            get(handlers::list_actions).post(handlers::submit_action),
        )
        .route("/jobs/{id}", get(handlers::get_job))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn start_server<F>(addr: &str, state: AppState, shutdown: F) -> Result<(), SwitchboardError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = create_router(state);

    tracing::info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SwitchboardError::Server(format!("Failed to bind {}: {}", addr, e)))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SwitchboardError::Server(format!("Server error: {}", e)))?;

    tracing::info!("API server stopped");
    Ok(())
}
