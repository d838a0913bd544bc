//! Integration test for fleet recovery from the persisted store
//!
//! Containers and in-flight work die with the process: a second boot over
//! the same database must settle active devices to `error` and re-queue
//! interrupted tasks.

mod common;

use common::{test_config, FakeRuntime};
use device_farm_backend::device::DeviceStatus;
use device_farm_backend::queue::{TaskPriority, TaskStatus};
use device_farm_backend::state::AppState;
use device_farm_backend::store::FleetStore;
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_fleet_recovers_after_restart() {
    let data_dir = tempfile::tempdir().unwrap();
    let config = test_config(52500, 52500, data_dir.path());
    let _listener = TcpListener::bind(("127.0.0.1", 52500)).await.unwrap();

    let (device_id, task_id) = {
        let store = Arc::new(FleetStore::new(&config.persistence.db_path).await.unwrap());
        let state = AppState::with_store(config.clone(), Arc::new(FakeRuntime::new()), store)
            .await
            .unwrap();

        let device = state
            .devices
            .create("pixel-1".to_string(), None)
            .await
            .unwrap();
        state.devices.start(&device.id).await.unwrap();

        let task = state
            .queue
            .submit(
                device.id.clone(),
                "long task".to_string(),
                None,
                TaskPriority::High,
                None,
                2,
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        // Simulate a worker holding the task when the process dies
        let dequeued = state.queue.dequeue_next().await.unwrap();
        assert_eq!(dequeued.id, task.id);
        state.queue.mark_running(&task.id).await.unwrap();

        (device.id, task.id)
    };

    // Second boot over the same database
    let store = Arc::new(FleetStore::new(&config.persistence.db_path).await.unwrap());
    let state = AppState::with_store(config.clone(), Arc::new(FakeRuntime::new()), store)
        .await
        .unwrap();

    let device = state.devices.get(&device_id).await.unwrap();
    assert_eq!(device.status, DeviceStatus::Error);
    assert!(device.container_ref.is_none());
    assert!(device.control_port.is_none());

    let task = state.queue.get(&task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Queued);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.priority, TaskPriority::High);

    // The recovered device can start again and the task remains dequeueable
    state.devices.start(&device_id).await.unwrap();
    let dequeued = state.queue.dequeue_next().await.unwrap();
    assert_eq!(dequeued.id, task_id);
}
