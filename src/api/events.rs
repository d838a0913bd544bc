//! Task event streaming (Server-Sent Events)
//!
//! Streams trace lines while a task runs and closes with its terminal
//! status, so a caller can follow execution without polling the task
//! resource.

use crate::error::AppError;
use crate::queue::TaskQueue;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};
use futures_util::{stream::Stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

/// How often the stream samples the task for new trace entries
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// GET /api/tasks/:id/events - SSE stream of trace entries and terminal status
pub async fn task_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    // 404 before the stream starts
    state.queue.get(&id).await?;

    let stream = event_stream(state.queue.clone(), id);
    let sse_stream = stream.map(|data| Ok::<_, std::io::Error>(format!("data: {}\n\n", data)));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(sse_stream))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to build SSE response: {}", e)))
}

/// Sample the task on an interval, yielding unseen trace entries as they land
fn event_stream(queue: Arc<TaskQueue>, task_id: String) -> impl Stream<Item = String> {
    use async_stream::stream;

    stream! {
        let mut seen = 0usize;
        let mut ticker = IntervalStream::new(tokio::time::interval(EVENT_POLL_INTERVAL));

        while ticker.next().await.is_some() {
            let task = match queue.get(&task_id).await {
                Ok(task) => task,
                Err(_) => break, // deleted mid-stream
            };

            while seen < task.trace.len() {
                let entry = &task.trace[seen];
                yield json!({
                    "type": "step",
                    "step": entry.step,
                    "message": entry.message,
                    "at": entry.at,
                })
                .to_string();
                seen += 1;
            }

            if task.status.is_terminal() {
                yield json!({
                    "type": "status",
                    "status": task.status,
                    "retry_count": task.retry_count,
                    "error": task.error,
                })
                .to_string();
                break;
            }
        }
    }
}
