pub mod destinations;

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use cotrelay_core::DestinationId;
use cotrelay_queue::registry::DestinationRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<DestinationRegistry>,
    /// Operator-facing names from the config, keyed by destination.
    pub names: Arc<HashMap<DestinationId, String>>,
}

/// Create the status API router.
pub fn api_router(
    registry: Arc<DestinationRegistry>,
    names: HashMap<DestinationId, String>,
) -> Router {
    let state = ApiState {
        registry,
        names: Arc::new(names),
    };

    Router::new()
        .route("/health", get(health))
        .route("/api/destinations", get(destinations::list_destinations))
        .route(
            "/api/destinations/{id}/metrics",
            get(destinations::destination_metrics),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}
