//! Application state: one struct owning every manager
//!
//! Each manager carries its own fine-grained locking, so the state itself
//! is shared as a plain `Arc` and never becomes a global mutex around
//! steady-state operation.

use crate::config::Config;
use crate::connectors::ConnectorRegistry;
use crate::device::{ContainerRuntime, DeviceManager};
use crate::error::AppError;
use crate::queue::TaskQueue;
use crate::snapshots::SnapshotManager;
use crate::store::FleetStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Shared application state handed to every request handler
pub struct AppState {
    /// Loaded configuration
    pub config: Config,
    /// Row persistence
    pub store: Arc<FleetStore>,
    /// Egress connector registry
    pub connectors: Arc<ConnectorRegistry>,
    /// Device lifecycle manager
    pub devices: Arc<DeviceManager>,
    /// Task queue and scheduler
    pub queue: Arc<TaskQueue>,
    /// Snapshot manager
    pub snapshots: Arc<SnapshotManager>,
}

impl AppState {
    /// Build the full state against a freshly opened database
    pub async fn initialize(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, AppError> {
        let store = Arc::new(FleetStore::new(&config.persistence.db_path).await?);
        Self::with_store(config, runtime, store).await
    }

    /// Build the full state over an existing store (tests use an in-memory one)
    pub async fn with_store(
        config: Config,
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<FleetStore>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::new();
        let data_root = PathBuf::from(&config.persistence.data_dir);

        let connectors = Arc::new(ConnectorRegistry::new(http, store.clone()));
        let devices = Arc::new(DeviceManager::new(
            runtime,
            connectors.clone(),
            store.clone(),
            config.runtime.clone(),
            data_root.clone(),
        ));
        let queue = Arc::new(TaskQueue::new(
            devices.clone(),
            store.clone(),
            config.execution.retry_backoff_base,
            config.execution.retry_backoff_cap,
        ));
        devices.bind_queue(queue.clone()).await;
        let snapshots = Arc::new(SnapshotManager::new(
            devices.clone(),
            store.clone(),
            data_root.join("snapshots"),
        ));

        let state = Self {
            config,
            store,
            connectors,
            devices,
            queue,
            snapshots,
        };
        state.recover().await?;
        Ok(state)
    }

    /// Reload persisted rows into the managers
    ///
    /// Containers and in-flight work do not survive the process: active
    /// devices settle to `error`, running tasks re-queue, interrupted
    /// snapshot operations settle to their resting state.
    async fn recover(&self) -> Result<(), AppError> {
        let connectors = self.store.load_connectors().await?;
        let connector_count = connectors.len();
        for meta in connectors {
            self.connectors.adopt(meta).await;
        }

        let devices = self.store.load_devices().await?;
        let device_count = devices.len();
        for device in devices {
            self.devices.adopt_recovered(device).await?;
        }

        let tasks = self.store.load_tasks().await?;
        let task_count = tasks.len();
        for task in tasks {
            self.queue.adopt_recovered(task).await?;
        }

        let snapshots = self.store.load_snapshots().await?;
        let snapshot_count = snapshots.len();
        for snapshot in snapshots {
            self.snapshots.adopt_recovered(snapshot).await?;
        }

        info!(
            devices = device_count,
            tasks = task_count,
            connectors = connector_count,
            snapshots = snapshot_count,
            "Fleet recovered from store"
        );
        Ok(())
    }
}
