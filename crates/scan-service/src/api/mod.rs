pub mod routes;

use crate::state::ScannerState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn router(state: ScannerState) -> Router {
    Router::new()
        // Health and metrics endpoints
        .route("/healthz", get(routes::healthz))
        .route("/readyz", get(routes::readyz))
        .route("/metrics", get(routes::metrics))
        // Scan endpoints
        .route("/v1/scans", post(routes::scan_image))
        .route("/v1/scans/camera", post(routes::scan_camera))
        // Plate endpoints
        .route("/v1/plates/normalize", post(routes::normalize))
        .route("/v1/vehicles/:plate", get(routes::lookup_vehicle))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
