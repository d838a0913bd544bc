//! Task entity, priority, and queue statistics

use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = String;

/// Task lifecycle status
///
/// `pending → scheduled → queued → running → {completed | failed |
/// cancelled}`; `failed` may move back to `queued` through retry while the
/// retry budget lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Accepted, waiting for its device to be running
    Pending,
    /// Accepted with a future dispatch time
    Scheduled,
    /// In the ready queue, eligible for dequeue
    Queued,
    /// A worker is executing it
    Running,
    /// Terminal: agent reported success
    Completed,
    /// Terminal: retries exhausted
    Failed,
    /// Terminal: cancelled before or during execution
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Task priority tier
///
/// Strict tier precedence at dequeue: urgent always wins regardless of
/// arrival time. There is deliberately no aging, so sustained urgent load
/// starves lower tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Lowest tier
    Low,
    /// Default tier
    Normal,
    /// Elevated tier
    High,
    /// Always dequeued before any lower tier
    Urgent,
}

impl TaskPriority {
    /// Numeric rank, higher dequeues first
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

/// One human-readable trace line, appended after every agent step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Step number this line belongs to (1-based)
    pub step: u32,
    /// What the agent did or reported
    pub message: String,
    /// When the entry was recorded
    pub at: DateTime<Utc>,
}

/// One bounded unit of device automation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: TaskId,
    /// Owning device
    pub device_id: DeviceId,
    /// Natural-language instruction for the agent
    pub instruction: String,
    /// Optional hint for the shape of the result payload
    pub output_format: Option<String>,
    /// Current status
    pub status: TaskStatus,
    /// Priority tier
    pub priority: TaskPriority,
    /// Future dispatch time, if any
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Retry budget
    pub max_retries: u32,
    /// Retries consumed so far
    pub retry_count: u32,
    /// Current ready-queue sequence number, if enqueued
    pub queue_seq: Option<u64>,
    /// Agent steps executed
    pub step_count: u32,
    /// Resource usage (agent tokens) consumed
    pub tokens_used: u64,
    /// Human-readable execution trace
    pub trace: Vec<TraceEntry>,
    /// Result payload on completion
    pub result: Option<serde_json::Value>,
    /// Human-readable error from the most recent failure
    pub error: Option<String>,
    /// Retry backoff gate; not dequeued before this instant
    pub eligible_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// When execution first began
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a task; `pending`, or `scheduled` when the dispatch time is in the future
    pub fn new(
        device_id: DeviceId,
        instruction: String,
        output_format: Option<String>,
        priority: TaskPriority,
        scheduled_at: Option<DateTime<Utc>>,
        max_retries: u32,
    ) -> Self {
        let now = Utc::now();
        let status = match scheduled_at {
            Some(at) if at > now => TaskStatus::Scheduled,
            _ => TaskStatus::Pending,
        };
        Self {
            id: Uuid::new_v4().to_string(),
            device_id,
            instruction,
            output_format,
            status,
            priority,
            scheduled_at,
            max_retries,
            retry_count: 0,
            queue_seq: None,
            step_count: 0,
            tokens_used: 0,
            trace: Vec::new(),
            result: None,
            error: None,
            eligible_at: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Whether the retry budget allows another attempt
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Queue statistics for pollers
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    /// Tasks waiting for their device
    pub pending: usize,
    /// Tasks with a future dispatch time
    pub scheduled: usize,
    /// Tasks in the ready queue
    pub queued: usize,
    /// Tasks currently executing
    pub running: usize,
    /// Terminal successes
    pub completed: usize,
    /// Terminal failures
    pub failed: usize,
    /// Terminal cancellations
    pub cancelled: usize,
    /// Ready-queue depth per priority tier, urgent first
    pub ready_by_priority: Vec<(TaskPriority, usize)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_task_is_pending_without_schedule() {
        let task = Task::new(
            "dev-1".to_string(),
            "open the browser".to_string(),
            None,
            TaskPriority::Normal,
            None,
            3,
        );
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn test_future_schedule_creates_scheduled_task() {
        let task = Task::new(
            "dev-1".to_string(),
            "open the browser".to_string(),
            None,
            TaskPriority::Normal,
            Some(Utc::now() + Duration::hours(1)),
            3,
        );
        assert_eq!(task.status, TaskStatus::Scheduled);
    }

    #[test]
    fn test_past_schedule_creates_pending_task() {
        let task = Task::new(
            "dev-1".to_string(),
            "open the browser".to_string(),
            None,
            TaskPriority::Normal,
            Some(Utc::now() - Duration::hours(1)),
            3,
        );
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(TaskPriority::Urgent.rank() > TaskPriority::High.rank());
        assert!(TaskPriority::High.rank() > TaskPriority::Normal.rank());
        assert!(TaskPriority::Normal.rank() > TaskPriority::Low.rank());
    }

    #[test]
    fn test_can_retry_respects_budget() {
        let mut task = Task::new(
            "dev-1".to_string(),
            "x".to_string(),
            None,
            TaskPriority::Normal,
            None,
            2,
        );
        assert!(task.can_retry());
        task.retry_count = 2;
        assert!(!task.can_retry());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
    }
}
