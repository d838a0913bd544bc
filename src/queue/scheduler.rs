//! Task queue, admission scheduler, and retry policy
//!
//! Ordering key is (priority rank descending, enqueue sequence ascending):
//! strict FIFO within a tier, and `urgent` always dequeues before any lower
//! tier regardless of arrival time. There is no starvation guard for lower
//! tiers under sustained urgent load; clients depend on the exact ordering.

use super::task::{QueueStats, Task, TaskId, TaskPriority, TaskStatus, TraceEntry};
use crate::device::{DeviceId, DeviceManager, DeviceStatus};
use crate::error::AppError;
use crate::store::FleetStore;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::{interval, sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

/// Terminal result of one execution attempt, reported by the owning worker
#[derive(Debug)]
pub enum TaskOutcome {
    /// The agent reported success with a result payload
    Completed(serde_json::Value),
    /// The attempt failed; retry policy decides what happens next
    Failed(String),
    /// The worker observed the cancellation flag at a step boundary
    Cancelled,
}

/// Ready-queue entry; max-heap on (rank, then earliest sequence)
struct ReadyEntry {
    rank: u8,
    seq: u64,
    task_id: TaskId,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher rank wins; within a tier the lower sequence (earlier
        // enqueue) wins
        self.rank
            .cmp(&other.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Mutable queue state, guarded by one mutex
struct QueueInner {
    tasks: HashMap<TaskId, Task>,
    ready: BinaryHeap<ReadyEntry>,
    next_seq: u64,
    /// Device id → task currently running against it
    running: HashMap<DeviceId, TaskId>,
    cancel_flags: HashMap<TaskId, Arc<AtomicBool>>,
    finish_notify: HashMap<TaskId, Arc<Notify>>,
}

/// Task queue and scheduler
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    devices: Arc<DeviceManager>,
    store: Arc<FleetStore>,
    backoff_base: Duration,
    backoff_cap: Duration,
}

impl TaskQueue {
    /// Create an empty queue
    pub fn new(
        devices: Arc<DeviceManager>,
        store: Arc<FleetStore>,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                tasks: HashMap::new(),
                ready: BinaryHeap::new(),
                next_seq: 0,
                running: HashMap::new(),
                cancel_flags: HashMap::new(),
                finish_notify: HashMap::new(),
            }),
            devices,
            store,
            backoff_base,
            backoff_cap,
        }
    }

    /// Submit a new task for a device
    ///
    /// Accepted even when the device is not running; such tasks sit in
    /// `pending` until the device comes up. A future `scheduled_at` defers
    /// admission until the time arrives.
    pub async fn submit(
        &self,
        device_id: DeviceId,
        instruction: String,
        output_format: Option<String>,
        priority: TaskPriority,
        scheduled_at: Option<chrono::DateTime<Utc>>,
        max_retries: u32,
    ) -> Result<Task, AppError> {
        if instruction.trim().is_empty() {
            return Err(AppError::InvalidInput("instruction cannot be empty".to_string()));
        }
        // Owning device must exist
        self.devices.get(&device_id).await?;

        let task = Task::new(
            device_id.clone(),
            instruction,
            output_format,
            priority,
            scheduled_at,
            max_retries,
        );

        let device_running = matches!(
            self.devices.status_of(&device_id).await,
            Ok(DeviceStatus::Running)
        );

        let mut inner = self.inner.lock().await;
        inner.tasks.insert(task.id.clone(), task.clone());

        let task = if task.status == TaskStatus::Pending && device_running {
            self.enqueue_locked(&mut inner, &task.id).await?
        } else {
            self.store.upsert_task(&task).await?;
            task
        };

        info!(task_id = %task.id, device_id = %device_id, status = ?task.status, "Task submitted");
        Ok(task)
    }

    /// Explicitly admit a pending or scheduled task into the ready queue
    ///
    /// Requires the owning device to be running; an explicit admit
    /// overrides a still-future dispatch time.
    pub async fn admit(&self, task_id: &str) -> Result<Task, AppError> {
        let device_id = {
            let inner = self.inner.lock().await;
            let task = inner
                .tasks
                .get(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            if !matches!(task.status, TaskStatus::Pending | TaskStatus::Scheduled) {
                return Err(AppError::InvalidState(format!(
                    "admit requires a pending or scheduled task, status is {:?}",
                    task.status
                )));
            }
            task.device_id.clone()
        };

        if !matches!(
            self.devices.status_of(&device_id).await,
            Ok(DeviceStatus::Running)
        ) {
            return Err(AppError::InvalidState(
                "owning device is not running".to_string(),
            ));
        }

        let mut inner = self.inner.lock().await;
        // Re-check: the scheduler loop may have admitted it meanwhile
        let status = inner
            .tasks
            .get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        match status {
            TaskStatus::Pending | TaskStatus::Scheduled => {
                self.enqueue_locked(&mut inner, task_id).await
            }
            TaskStatus::Queued => Ok(inner.tasks[task_id].clone()),
            other => Err(AppError::InvalidState(format!(
                "admit requires a pending or scheduled task, status is {:?}",
                other
            ))),
        }
    }

    /// One admission pass: due scheduled tasks become pending, pending tasks
    /// whose device is running become queued
    pub async fn poll_admissions(&self) {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;

        let candidates: Vec<TaskId> = inner
            .tasks
            .values()
            .filter(|t| match t.status {
                TaskStatus::Pending => true,
                TaskStatus::Scheduled => t.scheduled_at.map(|at| at <= now).unwrap_or(true),
                _ => false,
            })
            .map(|t| t.id.clone())
            .collect();

        for task_id in candidates {
            let device_id = match inner.tasks.get(&task_id) {
                Some(task) => task.device_id.clone(),
                None => continue,
            };

            let device_running = matches!(
                self.devices.status_of(&device_id).await,
                Ok(DeviceStatus::Running)
            );

            let mut became_pending = false;
            if let Some(task) = inner.tasks.get_mut(&task_id) {
                if task.status == TaskStatus::Scheduled {
                    task.status = TaskStatus::Pending;
                    task.updated_at = Utc::now();
                    became_pending = true;
                    debug!(task_id = %task_id, "Scheduled task is due");
                }
            }

            if device_running {
                if let Err(e) = self.enqueue_locked(&mut inner, &task_id).await {
                    warn!(task_id = %task_id, error = %e, "Admission failed");
                }
            } else if became_pending {
                // Persist the scheduled→pending move even when not admitted
                if let Some(snapshot) = inner.tasks.get(&task_id).cloned() {
                    if let Err(e) = self.store.upsert_task(&snapshot).await {
                        warn!(task_id = %task_id, error = %e, "Persisting admission state failed");
                    }
                }
            }
        }
    }

    /// Pull the next ready task for an idle worker
    ///
    /// Returns the highest-priority queued task whose backoff gate has
    /// passed, whose device is running, and whose device is not already
    /// executing a task. Ineligible entries keep their queue position.
    pub async fn dequeue_next(&self) -> Option<Task> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        let mut skipped: Vec<ReadyEntry> = Vec::new();
        let mut picked: Option<Task> = None;

        while let Some(entry) = inner.ready.pop() {
            let task = match inner.tasks.get(&entry.task_id) {
                Some(task) => task,
                None => continue, // deleted; drop the stale entry
            };
            if task.status != TaskStatus::Queued || task.queue_seq != Some(entry.seq) {
                continue; // superseded or no longer queued
            }
            if task.eligible_at.map(|at| at > now).unwrap_or(false) {
                skipped.push(entry);
                continue;
            }
            if inner.running.contains_key(&task.device_id) {
                skipped.push(entry);
                continue;
            }
            let device_running = matches!(
                self.devices.status_of(&task.device_id).await,
                Ok(DeviceStatus::Running)
            );
            if !device_running {
                skipped.push(entry);
                continue;
            }

            picked = Some(task.clone());
            break;
        }

        for entry in skipped {
            inner.ready.push(entry);
        }
        picked
    }

    /// Mark a dequeued task as running; returns its cancellation flag
    ///
    /// Fails with `Conflict` if the device already has a running task;
    /// `dequeue_next` prevents this, but the worker stays defensive.
    pub async fn mark_running(&self, task_id: &str) -> Result<Arc<AtomicBool>, AppError> {
        let mut inner = self.inner.lock().await;

        let (device_id, status) = {
            let task = inner
                .tasks
                .get(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            (task.device_id.clone(), task.status)
        };

        if status != TaskStatus::Queued {
            return Err(AppError::InvalidState(format!(
                "task is {:?}, not queued",
                status
            )));
        }
        if inner.running.contains_key(&device_id) {
            return Err(AppError::Conflict(format!(
                "device {} already has a running task",
                device_id
            )));
        }

        let flag = Arc::new(AtomicBool::new(false));
        let notify = Arc::new(Notify::new());
        inner.running.insert(device_id, task_id.to_string());
        inner.cancel_flags.insert(task_id.to_string(), flag.clone());
        inner
            .finish_notify
            .insert(task_id.to_string(), notify);

        let snapshot = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::Running;
            task.queue_seq = None;
            if task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            task.updated_at = Utc::now();
            task.clone()
        };
        self.store.upsert_task(&snapshot).await?;

        info!(task_id = %task_id, device_id = %snapshot.device_id, "Task running");
        Ok(flag)
    }

    /// Push a queued task back into the ready queue (defensive path)
    pub async fn requeue(&self, task_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let status = inner
            .tasks
            .get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        if status == TaskStatus::Queued {
            self.enqueue_locked(&mut inner, task_id).await?;
        }
        Ok(())
    }

    /// Record one executed agent step
    ///
    /// Worker-only: the sole mutation path for step and usage counters of a
    /// running task.
    pub async fn record_step(
        &self,
        task_id: &str,
        message: String,
        tokens_used: u64,
    ) -> Result<Task, AppError> {
        let mut inner = self.inner.lock().await;
        let snapshot = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Running {
                return Err(AppError::InvalidState(format!(
                    "steps can only be recorded while running, status is {:?}",
                    task.status
                )));
            }
            task.step_count += 1;
            task.tokens_used += tokens_used;
            task.trace.push(TraceEntry {
                step: task.step_count,
                message,
                at: Utc::now(),
            });
            task.updated_at = Utc::now();
            task.clone()
        };
        self.store.upsert_task(&snapshot).await?;
        Ok(snapshot)
    }

    /// Funnel the result of an execution attempt through retry policy
    ///
    /// Called only by the owning worker. Failures consume a retry and
    /// re-queue behind a monotonic, bounded backoff until the budget is
    /// exhausted.
    pub async fn report_outcome(
        &self,
        task_id: &str,
        outcome: TaskOutcome,
    ) -> Result<Task, AppError> {
        let mut inner = self.inner.lock().await;

        let cancel_requested = inner
            .cancel_flags
            .get(task_id)
            .map(|f| f.load(AtomicOrdering::SeqCst))
            .unwrap_or(false);

        let now = Utc::now();
        let mut requeue_after_update = false;
        let snapshot = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Running {
                return Err(AppError::Fatal(format!(
                    "outcome reported for task in {:?}",
                    task.status
                )));
            }

            match outcome {
                TaskOutcome::Completed(result) => {
                    task.status = TaskStatus::Completed;
                    task.result = Some(result);
                    task.error = None;
                    task.finished_at = Some(now);
                }
                TaskOutcome::Cancelled => {
                    task.status = TaskStatus::Cancelled;
                    task.finished_at = Some(now);
                }
                TaskOutcome::Failed(message) => {
                    task.error = Some(message);
                    if cancel_requested {
                        // Cancellation arrived while the step was in flight
                        task.status = TaskStatus::Cancelled;
                        task.finished_at = Some(now);
                    } else if task.can_retry() {
                        task.retry_count += 1;
                        task.status = TaskStatus::Queued;
                        task.eligible_at = Some(
                            now + chrono::Duration::from_std(
                                self.backoff_delay(task.retry_count),
                            )
                            .unwrap_or_else(|_| chrono::Duration::seconds(0)),
                        );
                        requeue_after_update = true;
                    } else {
                        task.status = TaskStatus::Failed;
                        task.finished_at = Some(now);
                    }
                }
            }
            task.updated_at = now;
            task.clone()
        };

        inner.running.remove(&snapshot.device_id);
        inner.cancel_flags.remove(task_id);
        if let Some(notify) = inner.finish_notify.remove(task_id) {
            notify.notify_waiters();
        }

        let snapshot = if requeue_after_update {
            self.enqueue_locked(&mut inner, task_id).await?
        } else {
            self.store.upsert_task(&snapshot).await?;
            snapshot
        };

        info!(
            task_id = %task_id,
            status = ?snapshot.status,
            retry_count = snapshot.retry_count,
            "Task outcome recorded"
        );
        Ok(snapshot)
    }

    /// Cancel a task
    ///
    /// Pending, scheduled, and queued tasks cancel immediately. A running
    /// task gets its flag set and transitions once the worker acknowledges
    /// at the next step boundary.
    pub async fn cancel(&self, task_id: &str) -> Result<Task, AppError> {
        let mut inner = self.inner.lock().await;
        let status = inner
            .tasks
            .get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;

        match status {
            TaskStatus::Pending | TaskStatus::Scheduled | TaskStatus::Queued => {
                let snapshot = {
                    let task = inner
                        .tasks
                        .get_mut(task_id)
                        .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
                    task.status = TaskStatus::Cancelled;
                    task.queue_seq = None;
                    task.finished_at = Some(Utc::now());
                    task.updated_at = Utc::now();
                    task.clone()
                };
                self.store.upsert_task(&snapshot).await?;
                info!(task_id = %task_id, "Task cancelled");
                Ok(snapshot)
            }
            TaskStatus::Running => {
                if let Some(flag) = inner.cancel_flags.get(task_id) {
                    flag.store(true, AtomicOrdering::SeqCst);
                    info!(task_id = %task_id, "Cancellation requested for running task");
                }
                inner
                    .tasks
                    .get(task_id)
                    .cloned()
                    .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
            }
            terminal => Err(AppError::InvalidState(format!(
                "task is already {:?}",
                terminal
            ))),
        }
    }

    /// Explicitly retry a failed task while its budget allows
    pub async fn retry(&self, task_id: &str) -> Result<Task, AppError> {
        let mut inner = self.inner.lock().await;
        {
            let task = inner
                .tasks
                .get(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            if task.status != TaskStatus::Failed {
                return Err(AppError::InvalidState(format!(
                    "retry requires a failed task, status is {:?}",
                    task.status
                )));
            }
            if !task.can_retry() {
                return Err(AppError::InvalidState(
                    "retry budget exhausted".to_string(),
                ));
            }
        }
        if let Some(task) = inner.tasks.get_mut(task_id) {
            task.eligible_at = None;
            task.finished_at = None;
        }
        self.enqueue_locked(&mut inner, task_id).await
    }

    /// Delete a terminal task
    pub async fn delete(&self, task_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let status = inner
            .tasks
            .get(task_id)
            .map(|t| t.status)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
        if !status.is_terminal() {
            return Err(AppError::InvalidState(
                "only completed, failed, or cancelled tasks can be deleted".to_string(),
            ));
        }
        inner.tasks.remove(task_id);
        self.store.delete_task(task_id).await?;
        Ok(())
    }

    /// Get a task by id
    pub async fn get(&self, task_id: &str) -> Result<Task, AppError> {
        self.inner
            .lock()
            .await
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }

    /// All tasks for a device, oldest first
    pub async fn list_for_device(&self, device_id: &str) -> Vec<Task> {
        let inner = self.inner.lock().await;
        let mut tasks: Vec<Task> = inner
            .tasks
            .values()
            .filter(|t| t.device_id == device_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Queue statistics for pollers
    pub async fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();
        for task in inner.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Scheduled => stats.scheduled += 1,
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        for priority in [
            TaskPriority::Urgent,
            TaskPriority::High,
            TaskPriority::Normal,
            TaskPriority::Low,
        ] {
            let depth = inner
                .tasks
                .values()
                .filter(|t| t.status == TaskStatus::Queued && t.priority == priority)
                .count();
            stats.ready_by_priority.push((priority, depth));
        }
        stats
    }

    /// Request cancellation of the task running on a device and wait
    /// (bounded) for the worker to acknowledge
    ///
    /// Called by the device manager during `stop`, before container teardown.
    pub async fn cancel_active_for_device(&self, device_id: &str, ack_timeout: Duration) {
        let task_id = {
            let inner = self.inner.lock().await;
            match inner.running.get(device_id) {
                Some(task_id) => {
                    if let Some(flag) = inner.cancel_flags.get(task_id) {
                        flag.store(true, AtomicOrdering::SeqCst);
                    }
                    task_id.clone()
                }
                None => return,
            }
        };
        info!(device_id = %device_id, task_id = %task_id, "Cancelling active task before stop");

        let deadline = Instant::now() + ack_timeout;
        loop {
            let (still_running, notify) = {
                let inner = self.inner.lock().await;
                let still_running = inner
                    .tasks
                    .get(&task_id)
                    .map(|t| t.status == TaskStatus::Running)
                    .unwrap_or(false);
                (still_running, inner.finish_notify.get(&task_id).cloned())
            };
            if !still_running {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(task_id = %task_id, "Cancellation acknowledgment timed out");
                return;
            }
            // Short poll bound guards against a notify racing the wait
            let wait = remaining.min(Duration::from_millis(200));
            match notify {
                Some(notify) => {
                    let _ = timeout(wait, notify.notified()).await;
                }
                None => sleep(wait).await,
            }
        }
    }

    /// Whether any task for the device is not yet terminal
    pub async fn has_unfinished_tasks(&self, device_id: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .tasks
            .values()
            .any(|t| t.device_id == device_id && !t.status.is_terminal())
    }

    /// Drop all (terminal) tasks of a device from memory
    ///
    /// Called during device deletion, after `has_unfinished_tasks` cleared it.
    pub async fn forget_tasks_for_device(&self, device_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        inner.tasks.retain(|_, t| t.device_id != device_id);
        Ok(())
    }

    /// Re-insert a task loaded from the store at boot
    ///
    /// In-flight work did not survive the process: running and queued tasks
    /// come back as queued with their retry counts intact.
    pub async fn adopt_recovered(&self, mut task: Task) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let requeue = matches!(task.status, TaskStatus::Running | TaskStatus::Queued);
        if task.status == TaskStatus::Running {
            task.status = TaskStatus::Queued;
        }
        task.queue_seq = None;
        let task_id = task.id.clone();
        inner.tasks.insert(task_id.clone(), task);
        if requeue {
            self.enqueue_locked(&mut inner, &task_id).await?;
        }
        Ok(())
    }

    // ---- internals ----

    /// Move a task into the ready queue; caller holds the inner lock
    async fn enqueue_locked(
        &self,
        inner: &mut QueueInner,
        task_id: &str,
    ) -> Result<Task, AppError> {
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let snapshot = {
            let task = inner
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))?;
            task.status = TaskStatus::Queued;
            task.queue_seq = Some(seq);
            task.updated_at = Utc::now();
            task.clone()
        };

        inner.ready.push(ReadyEntry {
            rank: snapshot.priority.rank(),
            seq,
            task_id: task_id.to_string(),
        });
        self.store.upsert_task(&snapshot).await?;
        debug!(task_id = %task_id, seq = seq, priority = ?snapshot.priority, "Task queued");
        Ok(snapshot)
    }

    /// Exponential backoff: `base * 2^(retry-1)`, capped; monotonic in the
    /// retry count and bounded by the cap
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let shift = retry_count.saturating_sub(1).min(16);
        let delay = self.backoff_base.saturating_mul(1u32 << shift);
        delay.min(self.backoff_cap)
    }
}

/// Background admission loop
///
/// Promotes due scheduled tasks and pending tasks whose device came up.
/// Runs until the shutdown signal flips.
pub async fn run_scheduler(
    queue: Arc<TaskQueue>,
    poll_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(poll_interval);
    info!("Scheduler loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                queue.poll_admissions().await;
            }
            _ = shutdown.changed() => {
                info!("Scheduler loop stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_entry_tier_precedence() {
        let mut heap = BinaryHeap::new();
        heap.push(ReadyEntry {
            rank: TaskPriority::Low.rank(),
            seq: 1,
            task_id: "low".to_string(),
        });
        heap.push(ReadyEntry {
            rank: TaskPriority::Urgent.rank(),
            seq: 2,
            task_id: "urgent".to_string(),
        });
        heap.push(ReadyEntry {
            rank: TaskPriority::Normal.rank(),
            seq: 3,
            task_id: "normal".to_string(),
        });

        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|e| e.task_id)).collect();
        assert_eq!(order, vec!["urgent", "low", "normal"]);
    }

    #[test]
    fn test_ready_entry_fifo_within_tier() {
        let mut heap = BinaryHeap::new();
        for seq in [5u64, 3, 4] {
            heap.push(ReadyEntry {
                rank: TaskPriority::Normal.rank(),
                seq,
                task_id: format!("t{}", seq),
            });
        }
        let order: Vec<String> = std::iter::from_fn(|| heap.pop().map(|e| e.task_id)).collect();
        assert_eq!(order, vec!["t3", "t4", "t5"]);
    }
}
