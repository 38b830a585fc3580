//! API route table

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::module::ModbusModule;
use crate::store::Store;

/// Build the API router over the module orchestrator.
pub fn api_router<S: Store>(module: Arc<ModbusModule<S>>) -> Router {
    Router::new()
        .route("/api/networks/schema", get(handlers::network_schema))
        .route("/api/devices/schema", get(handlers::device_schema))
        .route("/api/points/schema", get(handlers::point_schema))
        .route("/api/networks", post(handlers::create_network::<S>))
        .route(
            "/api/networks/{uuid}",
            patch(handlers::update_network::<S>).delete(handlers::delete_network::<S>),
        )
        .route("/api/devices", post(handlers::create_device::<S>))
        .route(
            "/api/devices/{uuid}",
            patch(handlers::update_device::<S>).delete(handlers::delete_device::<S>),
        )
        .route("/api/points", post(handlers::create_point::<S>))
        .route(
            "/api/points/{uuid}",
            patch(handlers::update_point::<S>).delete(handlers::delete_point::<S>),
        )
        .route("/api/points/{uuid}/write", patch(handlers::write_point::<S>))
        .route(
            "/api/polling/stats/network/name/{name}",
            get(handlers::network_polling_stats::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(module)
}
