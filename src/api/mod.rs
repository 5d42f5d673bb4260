pub mod health;

use axum::Router;

use crate::state::AppState;

/// Create the HTTP router for the read-only probes
pub fn create_router(state: AppState) -> Router {
    Router::new().merge(health::health_routes()).with_state(state)
}
