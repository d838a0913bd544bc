//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
///
/// All errors that can occur in the application are represented by this enum.
/// Each variant implements automatic conversion to HTTP responses via `IntoResponse`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Device with the given ID was not found
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Task with the given ID was not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Connector with the given ID was not found
    #[error("Connector not found: {0}")]
    ConnectorNotFound(String),

    /// Snapshot with the given ID was not found
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    /// Operation is not legal from the entity's current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Concurrent mutation collided; the caller must re-read and retry
    #[error("Conflict: {0}")]
    Conflict(String),

    /// No container or control-port capacity is available
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A probe or step exceeded its bound
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The agent or container runtime collaborator returned an error
    #[error("External collaborator error: {0}")]
    ExternalCollaborator(String),

    /// An invariant violation was detected; the operation was aborted
    #[error("Fatal invariant violation: {0}")]
    Fatal(String),

    /// Request payload failed validation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error occurred while reading or writing persisted rows
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::DeviceNotFound(_)
            | AppError::TaskNotFound(_)
            | AppError::ConnectorNotFound(_)
            | AppError::SnapshotNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::InvalidState(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, self.to_string()),
            AppError::ResourceExhausted(_) => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Timeout(_) => (StatusCode::REQUEST_TIMEOUT, self.to_string()),
            AppError::ExternalCollaborator(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Fatal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::InvalidInput(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
