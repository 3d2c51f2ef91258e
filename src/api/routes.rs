//! API route definitions

use super::handlers::{self, FeedState};
use super::stream_handlers;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the API router
pub fn create_router(state: FeedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health))
        // Change stream (SSE)
        .route("/api/stream", get(stream_handlers::stream_changes))
        // Companies
        .route("/api/companies", post(handlers::create_company))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
