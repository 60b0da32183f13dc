//! HTTP server wiring
//!
//! Routes mirror the Tesla Fleet API paths plus the proxy-local
//! introspection surface.

pub mod handlers;
pub mod response;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use fleetlink_ble::BleHandle;
use fleetlink_core::{Config, VehicleDataCache};

/// State shared across handlers
pub struct AppState {
    /// Submission handle to the orchestrator; `None` when no usable key or
    /// driver was available at startup
    pub ble: Option<BleHandle>,
    /// Per-endpoint vehicle-data cache
    pub cache: VehicleDataCache,
    /// Process configuration
    pub config: Config,
}

/// Create the server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/1/vehicles/:vin/command/:name",
            post(handlers::vehicle_command),
        )
        .route(
            "/api/1/vehicles/:vin/:name",
            get(handlers::vehicle_endpoint).post(handlers::vehicle_endpoint),
        )
        .route("/api/proxy/1/version", get(handlers::version))
        .route(
            "/api/proxy/1/vehicles/:vin/:name",
            get(handlers::proxy_command),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
