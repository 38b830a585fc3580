//! API handlers
//!
//! Thin adapters between the HTTP surface and the module orchestrator.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use poll_model::{Device, Network, Point, PointWriter, PollQueueStatistics};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::module::ModbusModule;
use crate::store::Store;

use super::schema;

type Module<S> = State<Arc<ModbusModule<S>>>;

// ============================================================================
// Schemas
// ============================================================================

pub async fn network_schema() -> Json<Value> {
    Json(schema::network_schema())
}

pub async fn device_schema() -> Json<Value> {
    Json(schema::device_schema())
}

pub async fn point_schema() -> Json<Value> {
    Json(schema::point_schema())
}

// ============================================================================
// Networks
// ============================================================================

pub async fn create_network<S: Store>(
    State(module): Module<S>,
    Json(body): Json<Network>,
) -> Result<Json<Network>> {
    Ok(Json(module.add_network(body).await?))
}

pub async fn update_network<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<Network>,
) -> Result<Json<Network>> {
    Ok(Json(module.update_network(uuid, body).await?))
}

pub async fn delete_network<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<bool>> {
    Ok(Json(module.delete_network(uuid).await?))
}

// ============================================================================
// Devices
// ============================================================================

pub async fn create_device<S: Store>(
    State(module): Module<S>,
    Json(body): Json<Device>,
) -> Result<Json<Device>> {
    Ok(Json(module.add_device(body).await?))
}

pub async fn update_device<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<Device>,
) -> Result<Json<Device>> {
    Ok(Json(module.update_device(uuid, body).await?))
}

pub async fn delete_device<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<bool>> {
    Ok(Json(module.delete_device(uuid).await?))
}

// ============================================================================
// Points
// ============================================================================

pub async fn create_point<S: Store>(
    State(module): Module<S>,
    Json(body): Json<Point>,
) -> Result<Json<Point>> {
    Ok(Json(module.add_point(body).await?))
}

pub async fn update_point<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<Point>,
) -> Result<Json<Point>> {
    Ok(Json(module.update_point(uuid, body).await?))
}

pub async fn delete_point<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<bool>> {
    Ok(Json(module.delete_point(uuid).await?))
}

pub async fn write_point<S: Store>(
    State(module): Module<S>,
    Path(uuid): Path<Uuid>,
    Json(body): Json<PointWriter>,
) -> Result<Json<Point>> {
    Ok(Json(module.write_point(uuid, &body).await?))
}

// ============================================================================
// Statistics
// ============================================================================

pub async fn network_polling_stats<S: Store>(
    State(module): Module<S>,
    Path(name): Path<String>,
) -> Result<Json<PollQueueStatistics>> {
    Ok(Json(module.polling_stats_by_network_name(&name)?))
}
