//! Task API handlers

use super::MessageResponse;
use crate::error::AppError;
use crate::queue::{QueueStats, Task, TaskPriority, TaskStatus, TraceEntry};
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default retry budget when the request omits one
fn default_max_retries() -> u32 {
    3
}

/// Task response type
#[derive(Debug, Serialize)]
pub struct TaskResponse {
    /// Unique identifier
    pub id: String,
    /// Owning device
    pub device_id: String,
    /// Instruction payload
    pub instruction: String,
    /// Output-format hint
    pub output_format: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Priority tier
    pub priority: TaskPriority,
    /// Future dispatch time, if any
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Retry budget
    pub max_retries: u32,
    /// Retries consumed
    pub retry_count: u32,
    /// Agent steps executed
    pub step_count: u32,
    /// Tokens consumed
    pub tokens_used: u64,
    /// Human-readable execution trace
    pub trace: Vec<TraceEntry>,
    /// Result payload on completion
    pub result: Option<serde_json::Value>,
    /// Error from the most recent failure
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When execution first began
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            device_id: task.device_id.clone(),
            instruction: task.instruction.clone(),
            output_format: task.output_format.clone(),
            status: task.status,
            priority: task.priority,
            scheduled_at: task.scheduled_at,
            max_retries: task.max_retries,
            retry_count: task.retry_count,
            step_count: task.step_count,
            tokens_used: task.tokens_used,
            trace: task.trace.clone(),
            result: task.result.clone(),
            error: task.error.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}

/// Tasks list response
#[derive(Serialize)]
pub struct TasksListResponse {
    /// Tasks, oldest first
    pub tasks: Vec<TaskResponse>,
    /// Total count
    pub count: usize,
}

/// Submit task request
#[derive(Deserialize)]
pub struct SubmitTaskRequest {
    /// Device to execute against
    pub device_id: String,
    /// Natural-language instruction
    pub instruction: String,
    /// Optional result-shape hint
    pub output_format: Option<String>,
    /// Priority tier; normal when omitted
    #[serde(default)]
    pub priority: TaskPriority,
    /// Defer dispatch until this time
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Retry budget
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// POST /api/tasks - Submit a task
pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> Result<(StatusCode, Json<TaskResponse>), AppError> {
    let task = state
        .queue
        .submit(
            request.device_id,
            request.instruction,
            request.output_format,
            request.priority,
            request.scheduled_at,
            request.max_retries,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(TaskResponse::from(&task))))
}

/// GET /api/tasks/:id - Get a task
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.queue.get(&id).await?;
    Ok(Json(TaskResponse::from(&task)))
}

/// GET /api/devices/:id/tasks - List a device's tasks
pub async fn list_device_tasks(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TasksListResponse>, AppError> {
    // 404 for unknown devices rather than an empty list
    state.devices.get(&id).await?;
    let tasks: Vec<TaskResponse> = state
        .queue
        .list_for_device(&id)
        .await
        .iter()
        .map(TaskResponse::from)
        .collect();
    Ok(Json(TasksListResponse {
        count: tasks.len(),
        tasks,
    }))
}

/// POST /api/tasks/:id/admit - Explicitly admit into the ready queue
pub async fn admit_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.queue.admit(&id).await?;
    Ok(Json(TaskResponse::from(&task)))
}

/// POST /api/tasks/:id/cancel - Cancel a task
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.queue.cancel(&id).await?;
    Ok(Json(TaskResponse::from(&task)))
}

/// POST /api/tasks/:id/retry - Retry a failed task
pub async fn retry_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, AppError> {
    let task = state.queue.retry(&id).await?;
    Ok(Json(TaskResponse::from(&task)))
}

/// DELETE /api/tasks/:id - Delete a terminal task
pub async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, AppError> {
    state.queue.delete(&id).await?;
    Ok(Json(MessageResponse::ok("Task deleted successfully")))
}

/// GET /api/tasks/stats - Queue statistics
pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(state.queue.stats().await))
}
