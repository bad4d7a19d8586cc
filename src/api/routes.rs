//! API Routes
//!
//! Configures the Axum router with all cache layer endpoints.

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{
    aggregate_handler, event_handler, health_handler, refresh_handler, resource_handler, snapshot_handler,
    AppState,
};

/// Creates the main router with all endpoints configured.
///
/// # Endpoints
/// - `GET /resources/:key` - Read-through get of a resource
/// - `GET /aggregates/:key` - Read-through get of an aggregate
/// - `GET /snapshot` - Cache diagnostics
/// - `POST /events` - Push a change notification
/// - `POST /refresh` - Invalidate and re-resolve every target
/// - `GET /health` - Health check endpoint
///
/// # Middleware
/// - CORS: Allows any origin
/// - Tracing: Logs all requests
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/resources/:key", get(resource_handler))
        .route("/aggregates/:key", get(aggregate_handler))
        .route("/snapshot", get(snapshot_handler))
        .route("/events", post(event_handler))
        .route("/refresh", post(refresh_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
