//! Integration tests for device lifecycle orchestration
//!
//! Drives the device manager against a fake container runtime with live
//! control-port listeners, covering start idempotency, failure cleanup,
//! and connector attachment rules.

mod common;

use common::fleet;
use device_farm_backend::connectors::ConnectorConfig;
use device_farm_backend::device::DeviceStatus;
use device_farm_backend::error::AppError;
use serde_json::json;

#[tokio::test]
async fn test_start_transitions_to_running() {
    let fleet = fleet(52100, 52101).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), Some(json!({"model": "Pixel 7"})))
        .await
        .unwrap();
    assert_eq!(device.status, DeviceStatus::Stopped);

    let started = fleet.state.devices.start(&device.id).await.unwrap();
    assert_eq!(started.status, DeviceStatus::Running);
    assert!(started.container_ref.is_some());
    assert_eq!(started.control_port, Some(52100));
    assert!(started.last_started_at.is_some());

    let report = fleet.state.devices.readiness(&device.id).await.unwrap();
    assert!(report.ready());
}

#[tokio::test]
async fn test_concurrent_start_is_idempotent() {
    let fleet = fleet(52110, 52111).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let devices = fleet.state.devices.clone();
        let id = device.id.clone();
        handles.push(tokio::spawn(async move { devices.start(&id).await }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, DeviceStatus::Running);
    }

    // Exactly one starting→running transition: one container was created
    assert_eq!(fleet.runtime.created_count(), 1);
}

#[tokio::test]
async fn test_failed_readiness_probe_releases_resources() {
    let fleet = fleet(52120, 52120).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    fleet.runtime.set_healthy(false);
    let result = fleet.state.devices.start(&device.id).await;
    assert!(matches!(result, Err(AppError::Timeout(_))));

    let device_after = fleet.state.devices.get(&device.id).await.unwrap();
    assert_eq!(device_after.status, DeviceStatus::Error);
    assert!(device_after.container_ref.is_none());
    assert!(device_after.control_port.is_none());

    // Error is a legal start source and the port was returned to the pool
    fleet.runtime.set_healthy(true);
    let restarted = fleet.state.devices.start(&device.id).await.unwrap();
    assert_eq!(restarted.status, DeviceStatus::Running);
    assert_eq!(restarted.control_port, Some(52120));
}

#[tokio::test]
async fn test_stop_requires_running() {
    let fleet = fleet(52130, 52130).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    let result = fleet.state.devices.stop(&device.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_stop_returns_device_to_stopped() {
    let fleet = fleet(52140, 52140).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let stopped = fleet.state.devices.stop(&device.id).await.unwrap();
    assert_eq!(stopped.status, DeviceStatus::Stopped);
    assert!(stopped.container_ref.is_none());
    assert!(stopped.control_port.is_none());
    assert!(stopped.last_stopped_at.is_some());
}

#[tokio::test]
async fn test_port_exhaustion_is_surfaced() {
    let fleet = fleet(52150, 52150).await;
    let first = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    let second = fleet
        .state
        .devices
        .create("pixel-2".to_string(), None)
        .await
        .unwrap();

    fleet.state.devices.start(&first.id).await.unwrap();
    let result = fleet.state.devices.start(&second.id).await;
    assert!(matches!(result, Err(AppError::ResourceExhausted(_))));
}

#[tokio::test]
async fn test_attach_connector_only_while_stopped() {
    let fleet = fleet(52160, 52160).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    let connector = fleet
        .state
        .connectors
        .create(
            "home-proxy".to_string(),
            ConnectorConfig::StaticProxy {
                url: "http://proxy.example:3128".to_string(),
                username: None,
                password: None,
            },
        )
        .await
        .unwrap();
    fleet.state.connectors.enable(&connector.id).await.unwrap();

    let attached = fleet
        .state
        .devices
        .attach_connector(&device.id, Some(connector.id.clone()))
        .await
        .unwrap();
    assert_eq!(attached.connector_id, Some(connector.id.clone()));

    fleet.state.devices.start(&device.id).await.unwrap();
    let result = fleet
        .state
        .devices
        .attach_connector(&device.id, None)
        .await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    fleet.state.devices.stop(&device.id).await.unwrap();
    let detached = fleet
        .state
        .devices
        .attach_connector(&device.id, None)
        .await
        .unwrap();
    assert_eq!(detached.connector_id, None);
}

#[tokio::test]
async fn test_start_rejects_disabled_connector() {
    let fleet = fleet(52170, 52170).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();
    let connector = fleet
        .state
        .connectors
        .create(
            "home-proxy".to_string(),
            ConnectorConfig::StaticProxy {
                url: "http://proxy.example:3128".to_string(),
                username: None,
                password: None,
            },
        )
        .await
        .unwrap();

    fleet
        .state
        .devices
        .attach_connector(&device.id, Some(connector.id.clone()))
        .await
        .unwrap();

    let result = fleet.state.devices.start(&device.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));

    // Enabling the connector makes the same start succeed
    fleet.state.connectors.enable(&connector.id).await.unwrap();
    let started = fleet.state.devices.start(&device.id).await.unwrap();
    assert_eq!(started.status, DeviceStatus::Running);
}

#[tokio::test]
async fn test_delete_requires_stopped_and_no_unfinished_tasks() {
    let fleet = fleet(52180, 52180).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), None)
        .await
        .unwrap();

    fleet.state.devices.start(&device.id).await.unwrap();
    let result = fleet.state.devices.delete(&device.id).await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));
    fleet.state.devices.stop(&device.id).await.unwrap();

    // A pending task blocks deletion until cancelled
    let task = fleet
        .state
        .queue
        .submit(
            device.id.clone(),
            "log into the app".to_string(),
            None,
            Default::default(),
            None,
            0,
        )
        .await
        .unwrap();
    let result = fleet.state.devices.delete(&device.id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    fleet.state.queue.cancel(&task.id).await.unwrap();
    fleet.state.devices.delete(&device.id).await.unwrap();

    let result = fleet.state.devices.get(&device.id).await;
    assert!(matches!(result, Err(AppError::DeviceNotFound(_))));
    assert!(fleet.state.devices.list().await.is_empty());
}

#[tokio::test]
async fn test_update_fingerprint_requires_stopped() {
    let fleet = fleet(52190, 52190).await;
    let device = fleet
        .state
        .devices
        .create("pixel-1".to_string(), Some(json!({"model": "Pixel 7"})))
        .await
        .unwrap();
    fleet.state.devices.start(&device.id).await.unwrap();

    let result = fleet
        .state
        .devices
        .update(&device.id, None, Some(json!({"model": "Pixel 8"})))
        .await;
    assert!(matches!(result, Err(AppError::InvalidState(_))));

    // Renaming while running is fine
    let renamed = fleet
        .state
        .devices
        .update(&device.id, Some("pixel-one".to_string()), None)
        .await
        .unwrap();
    assert_eq!(renamed.name, "pixel-one");
    assert_eq!(renamed.fingerprint, json!({"model": "Pixel 7"}));
}
