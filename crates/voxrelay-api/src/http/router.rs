//! Axum router configuration with middleware.
//!
//! Two WebSocket endpoints (`/ws/relay` for the voice transport,
//! `/ws/observe` for monitoring) plus a health check.
//! Middleware: CORS, tracing.

use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws/relay", get(handlers::relay::relay_handler))
        .route("/ws/observe", get(handlers::observe::observe_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - simple health check endpoint.
async fn health_check(State(state): State<AppState>) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.len(),
        "observers": state.hub.observer_count(),
    }))
}
