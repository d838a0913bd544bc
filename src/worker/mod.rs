//! Execution worker pool
//!
//! A fixed set of workers, each looping: dequeue → acquire the per-device
//! execution lock → mark the task running → drive the agent collaborator
//! one step at a time → release the lock → report the outcome. This is the
//! only component that mutates a running task's step and usage counters.
//!
//! Cancellation is cooperative: the flag handed out by `mark_running` is
//! checked before and after every step, and a step already in flight is
//! allowed to finish.

use crate::agent::{AgentStep, StepContext, StepOutcome};
use crate::config::ExecutionConfig;
use crate::device::{DeviceId, DeviceManager};
use crate::error::AppError;
use crate::queue::{Task, TaskOutcome, TaskQueue};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Per-device execution locks
///
/// The queue's running-task bookkeeping already guarantees one task per
/// device; the lock is the defensive second line, acquired with `try_lock`
/// so an unexpected collision fails fast instead of blocking a worker.
struct ExecutionLocks {
    locks: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
}

impl ExecutionLocks {
    fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn try_acquire(&self, device_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(device_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok()
    }
}

/// Fixed-size pool of task execution workers
pub struct WorkerPool {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawn the pool and start consuming the queue
    pub fn spawn(
        queue: Arc<TaskQueue>,
        devices: Arc<DeviceManager>,
        agent: Arc<dyn AgentStep>,
        config: ExecutionConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let locks = Arc::new(ExecutionLocks::new());

        let mut handles = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let queue = queue.clone();
            let devices = devices.clone();
            let agent = agent.clone();
            let locks = locks.clone();
            let config = config.clone();
            let shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, devices, agent, locks, config, shutdown_rx).await;
            }));
        }

        info!(worker_count = handles.len(), "Worker pool started");
        Self {
            handles: Mutex::new(handles),
            shutdown_tx,
        }
    }

    /// Stop all workers after their current task, and wait for them
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        join_all(handles).await;
        info!("Worker pool stopped");
    }
}

/// One worker: poll the queue, execute, repeat until shutdown
async fn worker_loop(
    worker_id: usize,
    queue: Arc<TaskQueue>,
    devices: Arc<DeviceManager>,
    agent: Arc<dyn AgentStep>,
    locks: Arc<ExecutionLocks>,
    config: ExecutionConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id = worker_id, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.dequeue_next().await {
            Some(task) => {
                execute_task(worker_id, &queue, &devices, agent.as_ref(), &locks, &config, task)
                    .await;
            }
            None => {
                tokio::select! {
                    _ = sleep(config.poll_interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }
    debug!(worker_id = worker_id, "Worker stopped");
}

/// Execute one task end to end and report its outcome
async fn execute_task(
    worker_id: usize,
    queue: &TaskQueue,
    devices: &DeviceManager,
    agent: &dyn AgentStep,
    locks: &ExecutionLocks,
    config: &ExecutionConfig,
    task: Task,
) {
    let Some(lock) = locks.try_acquire(&task.device_id).await else {
        // Should not happen given the queue's one-per-device invariant
        warn!(
            worker_id = worker_id,
            task_id = %task.id,
            device_id = %task.device_id,
            "Execution lock contention; requeueing"
        );
        if let Err(e) = queue.requeue(&task.id).await {
            warn!(task_id = %task.id, error = %e, "Requeue after contention failed");
        }
        return;
    };

    let cancel = match queue.mark_running(&task.id).await {
        Ok(flag) => flag,
        Err(AppError::Conflict(message)) => {
            warn!(task_id = %task.id, message = %message, "Device busy at mark-running; requeueing");
            if let Err(e) = queue.requeue(&task.id).await {
                warn!(task_id = %task.id, error = %e, "Requeue after conflict failed");
            }
            return;
        }
        Err(e) => {
            // Cancelled or deleted between dequeue and here
            debug!(task_id = %task.id, error = %e, "Task no longer runnable");
            return;
        }
    };

    info!(
        worker_id = worker_id,
        task_id = %task.id,
        device_id = %task.device_id,
        "Executing task"
    );

    let control_address = match devices.get(&task.device_id).await {
        Ok(device) => device
            .control_port
            .map(|port| format!("127.0.0.1:{}", port)),
        Err(_) => None,
    };

    let outcome = match control_address {
        Some(control_address) => {
            run_step_loop(queue, agent, config, &task, &control_address, &cancel).await
        }
        None => TaskOutcome::Failed("device lost its control binding".to_string()),
    };

    drop(lock);
    if let Err(e) = queue.report_outcome(&task.id, outcome).await {
        error!(task_id = %task.id, error = %e, "Failed to report task outcome");
    }
}

/// Drive the agent until completion, error, cancellation, or budget exhaustion
async fn run_step_loop(
    queue: &TaskQueue,
    agent: &dyn AgentStep,
    config: &ExecutionConfig,
    task: &Task,
    control_address: &str,
    cancel: &std::sync::atomic::AtomicBool,
) -> TaskOutcome {
    let mut attempt_steps = 0u32;
    // Step numbering continues across retries
    let mut next_index = task.step_count + 1;

    while attempt_steps < config.max_steps {
        if cancel.load(AtomicOrdering::SeqCst) {
            return TaskOutcome::Cancelled;
        }

        let context = StepContext {
            task_id: task.id.clone(),
            device_id: task.device_id.clone(),
            control_address: control_address.to_string(),
            instruction: task.instruction.clone(),
            output_format: task.output_format.clone(),
            step_index: next_index,
        };

        // Each step is independently bounded, not only the whole task
        let step = match timeout(config.step_timeout, agent.run_step(&context)).await {
            Ok(Ok(step)) => step,
            Ok(Err(e)) => return TaskOutcome::Failed(e.to_string()),
            Err(_) => {
                return TaskOutcome::Failed(format!(
                    "step {} timed out after {}s",
                    next_index,
                    config.step_timeout.as_secs()
                ))
            }
        };

        if let Err(e) = queue
            .record_step(task.id.as_str(), step.summary.clone(), step.tokens_used)
            .await
        {
            return TaskOutcome::Failed(format!("step bookkeeping failed: {}", e));
        }
        attempt_steps += 1;
        next_index += 1;

        match step.outcome {
            StepOutcome::Continue => {}
            StepOutcome::Complete(result) => return TaskOutcome::Completed(result),
            StepOutcome::Failed(message) => return TaskOutcome::Failed(message),
        }

        if cancel.load(AtomicOrdering::SeqCst) {
            return TaskOutcome::Cancelled;
        }
    }

    TaskOutcome::Failed(format!(
        "step budget of {} exhausted without completion",
        config.max_steps
    ))
}
