//! Connector API handlers

use crate::connectors::{ConnectorConfig, ConnectorHealth, ConnectorKind, ConnectorMeta, Route};
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

/// Connector response type
#[derive(Debug, Serialize)]
pub struct ConnectorResponse {
    /// Unique identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Connector kind
    pub kind: ConnectorKind,
    /// Whether the connector may be attached and used
    pub enabled: bool,
    /// Last-known connectivity state
    pub connectivity: ConnectorHealth,
    /// Last observed public egress address
    pub public_address: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl From<&ConnectorMeta> for ConnectorResponse {
    fn from(meta: &ConnectorMeta) -> Self {
        Self {
            id: meta.id.clone(),
            name: meta.name.clone(),
            kind: meta.kind,
            enabled: meta.enabled,
            connectivity: meta.connectivity.clone(),
            public_address: meta.public_address.clone(),
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        }
    }
}

/// Connectors list response
#[derive(Serialize)]
pub struct ConnectorsListResponse {
    /// All connectors, sorted by name
    pub connectors: Vec<ConnectorResponse>,
    /// Total count
    pub count: usize,
}

/// Create connector request
#[derive(Deserialize)]
pub struct CreateConnectorRequest {
    /// Display name
    pub name: String,
    /// Kind-specific configuration
    pub config: ConnectorConfig,
}

/// Replace-configuration request
#[derive(Deserialize)]
pub struct ConfigureConnectorRequest {
    /// New kind-specific configuration
    pub config: ConnectorConfig,
}

/// Routes response
#[derive(Serialize)]
pub struct RoutesResponse {
    /// Available egress routes; empty for static kinds
    pub routes: Vec<Route>,
}

/// Public address response
#[derive(Serialize)]
pub struct AddressResponse {
    /// Observed public egress address
    pub address: String,
}

/// GET /api/connectors - List all connectors
pub async fn list_connectors(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConnectorsListResponse>, AppError> {
    let connectors: Vec<ConnectorResponse> = state
        .connectors
        .list()
        .await
        .iter()
        .map(ConnectorResponse::from)
        .collect();
    Ok(Json(ConnectorsListResponse {
        count: connectors.len(),
        connectors,
    }))
}

/// GET /api/connectors/:id - Get a connector
pub async fn get_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorResponse>, AppError> {
    let meta = state.connectors.get(&id).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// POST /api/connectors - Register a new connector (disabled)
pub async fn create_connector(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateConnectorRequest>,
) -> Result<(StatusCode, Json<ConnectorResponse>), AppError> {
    let meta = state
        .connectors
        .create(request.name, request.config)
        .await?;
    Ok((StatusCode::CREATED, Json(ConnectorResponse::from(&meta))))
}

/// PUT /api/connectors/:id/config - Replace configuration (disabled only)
pub async fn configure_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ConfigureConnectorRequest>,
) -> Result<Json<ConnectorResponse>, AppError> {
    let meta = state.connectors.configure(&id, request.config).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// POST /api/connectors/:id/enable - Enable a connector
pub async fn enable_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorResponse>, AppError> {
    let meta = state.connectors.enable(&id).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// POST /api/connectors/:id/disable - Disable a connector
pub async fn disable_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorResponse>, AppError> {
    let meta = state.connectors.disable(&id).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// POST /api/connectors/:id/connect - Establish a session
pub async fn connect_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorResponse>, AppError> {
    state.connectors.connect(&id).await?;
    let meta = state.connectors.get(&id).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// POST /api/connectors/:id/disconnect - Tear down the session
pub async fn disconnect_connector(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorResponse>, AppError> {
    state.connectors.disconnect(&id).await?;
    let meta = state.connectors.get(&id).await?;
    Ok(Json(ConnectorResponse::from(&meta)))
}

/// GET /api/connectors/:id/status - Live connectivity check
pub async fn connector_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectorHealth>, AppError> {
    let health = state.connectors.status(&id).await?;
    Ok(Json(health))
}

/// GET /api/connectors/:id/routes - Available egress routes
pub async fn connector_routes(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<RoutesResponse>, AppError> {
    let routes = state.connectors.list_routes(&id).await?;
    Ok(Json(RoutesResponse { routes }))
}

/// GET /api/connectors/:id/address - Current public egress address
pub async fn connector_address(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<AddressResponse>, AppError> {
    let address = state.connectors.current_public_address(&id).await?;
    Ok(Json(AddressResponse { address }))
}
