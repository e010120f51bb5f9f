//! Device, sensor, option and point cloud handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::device::{DeviceInfo, OptionInfo, OptionValue, PointCloudStatus, SensorInfo};
use crate::error::Result;
use crate::state::AppState;

/// GET /api/devices
pub async fn list_devices(State(state): State<Arc<AppState>>) -> Json<Vec<DeviceInfo>> {
    Json(state.registry.list_devices())
}

/// GET /api/devices/:device_id
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<DeviceInfo>> {
    Ok(Json(state.registry.get_device(&device_id)?))
}

/// POST /api/devices/refresh
pub async fn refresh_devices(State(state): State<Arc<AppState>>) -> Result<Json<Vec<DeviceInfo>>> {
    Ok(Json(state.refresh_devices().await?))
}

/// GET /api/devices/:device_id/sensors
pub async fn list_sensors(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<SensorInfo>>> {
    Ok(Json(state.registry.get_sensors(&device_id)?))
}

/// GET /api/devices/:device_id/sensors/:sensor_id
pub async fn get_sensor(
    State(state): State<Arc<AppState>>,
    Path((device_id, sensor_id)): Path<(String, String)>,
) -> Result<Json<SensorInfo>> {
    Ok(Json(state.registry.get_sensor(&device_id, &sensor_id)?))
}

/// GET /api/devices/:device_id/sensors/:sensor_id/options
pub async fn list_options(
    State(state): State<Arc<AppState>>,
    Path((device_id, sensor_id)): Path<(String, String)>,
) -> Result<Json<Vec<OptionInfo>>> {
    Ok(Json(
        state
            .registry
            .get_sensor_options(&device_id, &sensor_id)
            .await?,
    ))
}

/// GET /api/devices/:device_id/sensors/:sensor_id/options/:option_id
pub async fn get_option(
    State(state): State<Arc<AppState>>,
    Path((device_id, sensor_id, option_id)): Path<(String, String, String)>,
) -> Result<Json<OptionInfo>> {
    Ok(Json(
        state
            .registry
            .get_option(&device_id, &sensor_id, &option_id)
            .await?,
    ))
}

/// Body of an option write
#[derive(Debug, Deserialize, Serialize)]
pub struct SetOptionRequest {
    pub value: OptionValue,
}

/// PUT /api/devices/:device_id/sensors/:sensor_id/options/:option_id
pub async fn set_option(
    State(state): State<Arc<AppState>>,
    Path((device_id, sensor_id, option_id)): Path<(String, String, String)>,
    Json(req): Json<SetOptionRequest>,
) -> Result<Json<OptionInfo>> {
    Ok(Json(
        state
            .registry
            .set_option(&device_id, &sensor_id, &option_id, req.value)
            .await?,
    ))
}

/// POST /api/devices/:device_id/point_cloud/activate
pub async fn point_cloud_activate(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<PointCloudStatus>> {
    Ok(Json(state.capture.set_point_cloud(&device_id, true).await?))
}

/// POST /api/devices/:device_id/point_cloud/deactivate
pub async fn point_cloud_deactivate(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<PointCloudStatus>> {
    Ok(Json(state.capture.set_point_cloud(&device_id, false).await?))
}

/// GET /api/devices/:device_id/point_cloud/status
pub async fn point_cloud_status(
    State(state): State<Arc<AppState>>,
    Path(device_id): Path<String>,
) -> Result<Json<PointCloudStatus>> {
    Ok(Json(state.capture.point_cloud_status(&device_id)?))
}
