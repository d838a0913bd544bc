//! Device management API handlers

use super::MessageResponse;
use crate::device::{Device, DeviceStatus, ReadinessReport};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Device response type
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Current lifecycle status
    pub status: DeviceStatus,
    /// Backing container reference, when active
    pub container_ref: Option<String>,
    /// Allocated control port, when active
    pub control_port: Option<u16>,
    /// Opaque fingerprint configuration
    pub fingerprint: serde_json::Value,
    /// Attached connector id, `None` for direct egress
    pub connector_id: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the device last entered `running`
    pub last_started_at: Option<DateTime<Utc>>,
    /// When the device last returned to `stopped`
    pub last_stopped_at: Option<DateTime<Utc>>,
}

impl From<&Device> for DeviceResponse {
    fn from(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            status: device.status,
            container_ref: device.container_ref.clone(),
            control_port: device.control_port,
            fingerprint: device.fingerprint.clone(),
            connector_id: device.connector_id.clone(),
            created_at: device.created_at,
            last_started_at: device.last_started_at,
            last_stopped_at: device.last_stopped_at,
        }
    }
}

/// Devices list response
#[derive(Serialize)]
pub struct DevicesListResponse {
    /// All devices
    pub devices: Vec<DeviceResponse>,
    /// Total count
    pub count: usize,
}

/// Create device request
#[derive(Deserialize)]
pub struct CreateDeviceRequest {
    /// Display name for the new device
    pub name: String,
    /// Opaque fingerprint configuration; empty object when omitted
    pub fingerprint: Option<serde_json::Value>,
}

/// Update device request
#[derive(Deserialize)]
pub struct UpdateDeviceRequest {
    /// New display name (optional)
    pub name: Option<String>,
    /// Replacement fingerprint; only legal while stopped (optional)
    pub fingerprint: Option<serde_json::Value>,
}

/// Connector attachment request
#[derive(Deserialize)]
pub struct AttachConnectorRequest {
    /// Connector to attach, or `null` for direct egress
    pub connector_id: Option<String>,
}

/// GET /api/devices - List all devices
pub async fn list_devices(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DevicesListResponse>, AppError> {
    let devices: Vec<DeviceResponse> = state
        .devices
        .list()
        .await
        .iter()
        .map(DeviceResponse::from)
        .collect();

    Ok(Json(DevicesListResponse {
        count: devices.len(),
        devices,
    }))
}

/// GET /api/devices/:id - Get a specific device
pub async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceResponse>, AppError> {
    let device = state.devices.get(&id).await?;
    Ok(Json(DeviceResponse::from(&device)))
}

/// POST /api/devices - Create a new device
pub async fn create_device(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateDeviceRequest>,
) -> Result<(StatusCode, Json<DeviceResponse>), AppError> {
    let device = state
        .devices
        .create(request.name, request.fingerprint)
        .await?;
    Ok((StatusCode::CREATED, Json(DeviceResponse::from(&device))))
}

/// PUT /api/devices/:id - Update a device
pub async fn update_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<UpdateDeviceRequest>,
) -> Result<Json<DeviceResponse>, AppError> {
    let device = state
        .devices
        .update(&id, request.name, request.fingerprint)
        .await?;
    Ok(Json(DeviceResponse::from(&device)))
}

/// DELETE /api/devices/:id - Delete a stopped device
pub async fn delete_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.devices.delete(&id).await?;
    Ok(Json(MessageResponse::ok("Device deleted successfully")))
}

/// POST /api/devices/:id/start - Start a device
pub async fn start_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceResponse>, AppError> {
    let device = state.devices.start(&id).await?;
    Ok(Json(DeviceResponse::from(&device)))
}

/// POST /api/devices/:id/stop - Stop a device
pub async fn stop_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeviceResponse>, AppError> {
    let device = state.devices.stop(&id).await?;
    Ok(Json(DeviceResponse::from(&device)))
}

/// PUT /api/devices/:id/connector - Attach or detach a connector
pub async fn attach_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<AttachConnectorRequest>,
) -> Result<Json<DeviceResponse>, AppError> {
    let device = state
        .devices
        .attach_connector(&id, request.connector_id)
        .await?;
    Ok(Json(DeviceResponse::from(&device)))
}

/// GET /api/devices/:id/readiness - Composite health probe
pub async fn device_readiness(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReadinessReport>, AppError> {
    let report = state.devices.readiness(&id).await?;
    Ok(Json(report))
}
