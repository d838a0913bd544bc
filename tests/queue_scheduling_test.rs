//! Integration tests for task admission, ordering, and retry policy
//!
//! Drives the queue directly (no worker pool) so dequeue order and state
//! transitions can be observed deterministically.

mod common;

use common::fleet;
use device_farm_backend::error::AppError;
use device_farm_backend::queue::{TaskOutcome, TaskPriority, TaskStatus};
use std::time::Duration;

#[tokio::test]
async fn test_priority_tier_precedence_with_fifo_tiebreak() {
    let fleet = fleet(52200, 52200).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    // Queued in order: low, urgent, normal
    let low = fleet
        .state
        .queue
        .submit(device.id.clone(), "task a".to_string(), None, TaskPriority::Low, None, 0)
        .await
        .unwrap();
    let urgent = fleet
        .state
        .queue
        .submit(device.id.clone(), "task b".to_string(), None, TaskPriority::Urgent, None, 0)
        .await
        .unwrap();
    let normal = fleet
        .state
        .queue
        .submit(device.id.clone(), "task c".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();

    // Tier first, arrival order within a tier: urgent, then low, then normal
    let first = fleet.state.queue.dequeue_next().await.unwrap();
    assert_eq!(first.id, urgent.id);
    let second = fleet.state.queue.dequeue_next().await.unwrap();
    assert_eq!(second.id, low.id);
    let third = fleet.state.queue.dequeue_next().await.unwrap();
    assert_eq!(third.id, normal.id);
}

#[tokio::test]
async fn test_fifo_within_same_tier() {
    let fleet = fleet(52210, 52210).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let mut submitted = Vec::new();
    for i in 0..4 {
        let task = fleet
            .state
            .queue
            .submit(
                device.id.clone(),
                format!("task {}", i),
                None,
                TaskPriority::Normal,
                None,
                0,
            )
            .await
            .unwrap();
        submitted.push(task.id);
    }

    for expected in &submitted {
        let task = fleet.state.queue.dequeue_next().await.unwrap();
        assert_eq!(&task.id, expected);
    }
}

#[tokio::test]
async fn test_submit_for_stopped_device_stays_pending() {
    let fleet = fleet(52220, 52220).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    let task = fleet
        .state
        .queue
        .submit(
            device.id.clone(),
            "warm up the feed".to_string(),
            None,
            TaskPriority::Urgent,
            None,
            2,
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);

    // Admission passes do nothing while the device is down
    fleet.state.queue.poll_admissions().await;
    let task = fleet.state.queue.get(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(fleet.state.queue.dequeue_next().await.is_none());

    // Starting the device makes the next pass admit it
    fleet.state.devices.start(&device.id).await.unwrap();
    fleet.state.queue.poll_admissions().await;
    let task = fleet.state.queue.get(&task.id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_scheduled_task_admitted_when_due() {
    let fleet = fleet(52230, 52230).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let task = fleet
        .state
        .queue
        .submit(
            device.id.clone(),
            "post at noon".to_string(),
            None,
            TaskPriority::Normal,
            Some(chrono::Utc::now() + chrono::Duration::milliseconds(150)),
            0,
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Scheduled);

    fleet.state.queue.poll_admissions().await;
    let task_now = fleet.state.queue.get(&task.id).await.unwrap();
    assert_eq!(task_now.status, TaskStatus::Scheduled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    fleet.state.queue.poll_admissions().await;
    let task_later = fleet.state.queue.get(&task.id).await.unwrap();
    assert_eq!(task_later.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_explicit_admit_requires_running_device() {
    let fleet = fleet(52240, 52240).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    let task = fleet
        .state
        .queue
        .submit(device.id.clone(), "x".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();

    let result = fleet.state.queue.admit(&task.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));

    fleet.state.devices.start(&device.id).await.unwrap();
    let admitted = fleet.state.queue.admit(&task.id).await.unwrap();
    assert_eq!(admitted.status, TaskStatus::Queued);
}

#[tokio::test]
async fn test_retry_count_monotonic_until_failed() {
    let fleet = fleet(52250, 52250).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let task = fleet
        .state
        .queue
        .submit(device.id.clone(), "flaky".to_string(), None, TaskPriority::Normal, None, 2)
        .await
        .unwrap();

    let mut last_retry_count = 0;
    for attempt in 1..=3u32 {
        // Wait out the backoff gate from the previous failure
        let dequeued = loop {
            match fleet.state.queue.dequeue_next().await {
                Some(task) => break task,
                None => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        };
        assert_eq!(dequeued.id, task.id);
        fleet.state.queue.mark_running(&task.id).await.unwrap();
        let after = fleet
            .state
            .queue
            .report_outcome(&task.id, TaskOutcome::Failed(format!("boom {}", attempt)))
            .await
            .unwrap();

        if attempt <= 2 {
            assert_eq!(after.status, TaskStatus::Queued);
            assert!(after.retry_count > last_retry_count, "retry count must increase");
            assert!(after.eligible_at.is_some());
            last_retry_count = after.retry_count;
        } else {
            assert_eq!(after.status, TaskStatus::Failed);
            assert_eq!(after.retry_count, 2);
            assert_eq!(after.error.as_deref(), Some("boom 3"));
        }
    }

    // Exhausted tasks never re-queue
    assert!(fleet.state.queue.dequeue_next().await.is_none());
    let result = fleet.state.queue.retry(&task.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_dequeue_enforces_one_task_per_device() {
    let fleet = fleet(52260, 52260).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let first = fleet
        .state
        .queue
        .submit(device.id.clone(), "one".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();
    let second = fleet
        .state
        .queue
        .submit(device.id.clone(), "two".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();

    let dequeued = fleet.state.queue.dequeue_next().await.unwrap();
    assert_eq!(dequeued.id, first.id);
    fleet.state.queue.mark_running(&first.id).await.unwrap();

    // The device is busy; its second task stays queued
    assert!(fleet.state.queue.dequeue_next().await.is_none());

    fleet
        .state
        .queue
        .report_outcome(&first.id, TaskOutcome::Completed(serde_json::json!("done")))
        .await
        .unwrap();
    let next = fleet.state.queue.dequeue_next().await.unwrap();
    assert_eq!(next.id, second.id);
}

#[tokio::test]
async fn test_cancel_before_execution() {
    let fleet = fleet(52270, 52270).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let task = fleet
        .state
        .queue
        .submit(device.id.clone(), "never mind".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Queued);

    let cancelled = fleet.state.queue.cancel(&task.id).await.unwrap();
    assert_eq!(cancelled.status, TaskStatus::Cancelled);
    assert!(fleet.state.queue.dequeue_next().await.is_none());

    // Cancelling a terminal task is rejected
    let result = fleet.state.queue.cancel(&task.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_queue_stats_reflect_statuses() {
    let fleet = fleet(52280, 52280).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    fleet
        .state
        .queue
        .submit(device.id.clone(), "a".to_string(), None, TaskPriority::Normal, None, 0)
        .await
        .unwrap();
    fleet
        .state
        .queue
        .submit(
            device.id.clone(),
            "b".to_string(),
            None,
            TaskPriority::Urgent,
            Some(chrono::Utc::now() + chrono::Duration::hours(1)),
            0,
        )
        .await
        .unwrap();

    let stats = fleet.state.queue.stats().await;
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.scheduled, 1);
    assert_eq!(stats.queued, 0);
    assert_eq!(stats.running, 0);
}
