//! Route definitions for the hazard, alert, validation and tracking surfaces

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, ApiState};

pub fn hazard_routes(state: ApiState) -> Router {
    Router::new()
        .route("/realtime", get(handlers::get_realtime))
        .route("/cyclones", get(handlers::get_cyclones))
        .route("/floods", get(handlers::get_floods))
        .route("/landslides", get(handlers::get_landslides))
        .route("/convergences", get(handlers::get_convergences))
        .route("/summary", get(handlers::get_summary))
        .route("/by-region/:region", get(handlers::get_by_region))
        .route("/health", get(handlers::get_health))
        .with_state(state)
}

pub fn alert_routes(state: ApiState) -> Router {
    Router::new()
        .route("/test", post(handlers::post_alert_test))
        .route("/send", post(handlers::post_alert_send))
        .route("/history", get(handlers::get_alert_history))
        .route("/preview/:alert_type", get(handlers::get_alert_preview))
        .with_state(state)
}

pub fn validation_routes(state: ApiState) -> Router {
    Router::new()
        .route("/stats", get(handlers::get_validation_stats))
        .route("/record", post(handlers::post_validation_record))
        .with_state(state)
}

pub fn tracking_routes(state: ApiState) -> Router {
    Router::new()
        .route("/:pixel", get(handlers::get_tracking_pixel))
        .with_state(state)
}
