use axum::{routing::get, Router};

use crate::state::AppState;

/// Health and version probes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
}

/// GET /health
async fn health() -> &'static str {
    "OK"
}

/// GET /version
async fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
