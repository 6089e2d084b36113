//! HTTP API facade
//!
//! Read endpoints over the unified query engine plus administrative
//! triggers (test/send alerts, validation reconciliation) and the
//! tracking-pixel endpoint. The facade does no business logic beyond
//! parameter parsing and translating internal errors to status codes:
//! 400 invalid parameters, 404 unknown region/alert type, 500 internal,
//! 503 when detection data is unavailable and nothing is cached.

pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Build the complete application router
pub fn create_app(state: ApiState) -> Router {
    Router::new()
        .nest("/hazards", routes::hazard_routes(state.clone()))
        .nest("/alerts", routes::alert_routes(state.clone()))
        .nest("/validation", routes::validation_routes(state.clone()))
        .nest("/track", routes::tracking_routes(state))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
}
