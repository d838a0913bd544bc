//! Snapshot API handlers

use super::devices::DeviceResponse;
use super::MessageResponse;
use crate::error::AppError;
use crate::snapshots::{Snapshot, SnapshotStatus};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot response type
#[derive(Debug, Serialize)]
pub struct SnapshotResponse {
    /// Unique identifier
    pub id: String,
    /// Source device id
    pub device_id: String,
    /// Display name
    pub name: String,
    /// Current status
    pub status: SnapshotStatus,
    /// Captured size in bytes
    pub size_bytes: u64,
    /// Source device name at capture time
    pub source_name: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl From<&Snapshot> for SnapshotResponse {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id.clone(),
            device_id: snapshot.device_id.clone(),
            name: snapshot.name.clone(),
            status: snapshot.status,
            size_bytes: snapshot.size_bytes,
            source_name: snapshot.source_name.clone(),
            created_at: snapshot.created_at,
        }
    }
}

/// Snapshots list response
#[derive(Serialize)]
pub struct SnapshotsListResponse {
    /// All snapshots, newest first
    pub snapshots: Vec<SnapshotResponse>,
    /// Total count
    pub count: usize,
}

/// Create snapshot request
#[derive(Deserialize)]
pub struct CreateSnapshotRequest {
    /// Device to capture (must be stopped)
    pub device_id: String,
    /// Display name for the snapshot
    pub name: String,
}

/// Restore snapshot request
#[derive(Deserialize, Default)]
pub struct RestoreSnapshotRequest {
    /// Name for the new device; derived from the source when omitted
    pub new_name: Option<String>,
}

/// POST /api/snapshots - Capture a device's storage
pub async fn create_snapshot(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateSnapshotRequest>,
) -> Result<(StatusCode, Json<SnapshotResponse>), AppError> {
    let snapshot = state
        .snapshots
        .create(&request.device_id, request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(SnapshotResponse::from(&snapshot))))
}

/// GET /api/snapshots - List all snapshots
pub async fn list_snapshots(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SnapshotsListResponse>, AppError> {
    let snapshots: Vec<SnapshotResponse> = state
        .snapshots
        .list()
        .await
        .iter()
        .map(SnapshotResponse::from)
        .collect();
    Ok(Json(SnapshotsListResponse {
        count: snapshots.len(),
        snapshots,
    }))
}

/// GET /api/snapshots/:id - Get a snapshot
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SnapshotResponse>, AppError> {
    let snapshot = state.snapshots.get(&id).await?;
    Ok(Json(SnapshotResponse::from(&snapshot)))
}

/// POST /api/snapshots/:id/restore - Restore into a new device
pub async fn restore_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<RestoreSnapshotRequest>,
) -> Result<(StatusCode, Json<DeviceResponse>), AppError> {
    let device = state.snapshots.restore(&id, request.new_name).await?;
    Ok((StatusCode::CREATED, Json(DeviceResponse::from(&device))))
}

/// DELETE /api/snapshots/:id - Delete a snapshot
pub async fn delete_snapshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.snapshots.delete(&id).await?;
    Ok(Json(MessageResponse::ok("Snapshot deleted successfully")))
}
