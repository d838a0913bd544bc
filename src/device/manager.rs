//! Device lifecycle manager
//!
//! Owns the authoritative state of every device: container binding, control
//! port, connector attachment, and the start/stop orchestration. State
//! transitions use per-device mutual exclusion; the only global lock is the
//! port allocator's, scoped to the allocation step.

use super::model::{Device, DeviceId, DeviceStatus, ReadinessReport};
use super::ports::PortAllocator;
use super::runtime::{ContainerRuntime, ContainerSpec};
use crate::config::RuntimeConfig;
use crate::connectors::{ConnectorRegistry, EgressSpec};
use crate::error::AppError;
use crate::queue::TaskQueue;
use crate::store::FleetStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{info, warn};

/// Containers bind their control channel on the loopback interface
const CONTROL_HOST: &str = "127.0.0.1";

/// How long a single control-channel TCP probe may take
const CONTROL_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Delay between readiness probe attempts during start
const PROBE_INTERVAL: Duration = Duration::from_millis(500);

/// Manages the lifecycle of all devices in the fleet
pub struct DeviceManager {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
    /// Per-device guard serializing start/stop transitions
    guards: Mutex<HashMap<DeviceId, Arc<Mutex<()>>>>,
    runtime: Arc<dyn ContainerRuntime>,
    connectors: Arc<ConnectorRegistry>,
    ports: Arc<PortAllocator>,
    store: Arc<FleetStore>,
    config: RuntimeConfig,
    data_root: PathBuf,
    /// Bound after construction; breaks the manager/queue cycle
    queue: RwLock<Option<Arc<TaskQueue>>>,
}

impl DeviceManager {
    /// Create a manager over an empty fleet
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        connectors: Arc<ConnectorRegistry>,
        store: Arc<FleetStore>,
        config: RuntimeConfig,
        data_root: PathBuf,
    ) -> Self {
        let ports = Arc::new(PortAllocator::new(
            config.port_range_start,
            config.port_range_end,
        ));
        Self {
            devices: Arc::new(RwLock::new(HashMap::new())),
            guards: Mutex::new(HashMap::new()),
            runtime,
            connectors,
            ports,
            store,
            config,
            data_root,
            queue: RwLock::new(None),
        }
    }

    /// Bind the task queue used for cancellation and deletion checks
    pub async fn bind_queue(&self, queue: Arc<TaskQueue>) {
        *self.queue.write().await = Some(queue);
    }

    /// Create a new device in the `stopped` state
    pub async fn create(
        &self,
        name: String,
        fingerprint: Option<serde_json::Value>,
    ) -> Result<Device, AppError> {
        let id = Device::generate_id();
        let data_dir = self.data_root.join("devices").join(&id);
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Failed to create device storage: {}", e))
        })?;

        let mut device = Device::new(
            name,
            fingerprint.unwrap_or_else(|| serde_json::json!({})),
            data_dir.to_string_lossy().to_string(),
        );
        device.id = id;
        device.validate().map_err(AppError::InvalidInput)?;

        self.store.upsert_device(&device).await?;
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device.clone());

        info!(device_id = %device.id, name = %device.name, "Device created");
        Ok(device)
    }

    /// Re-insert a device loaded from the store at boot
    ///
    /// Containers do not survive the process: devices persisted in an
    /// active status come back as `error` with their bindings cleared.
    pub async fn adopt_recovered(&self, mut device: Device) -> Result<(), AppError> {
        if device.status.is_active() {
            warn!(
                device_id = %device.id,
                status = ?device.status,
                "Recovered device was active at shutdown; marking error"
            );
            device.status = DeviceStatus::Error;
            device.container_ref = None;
            device.control_port = None;
            self.store.upsert_device(&device).await?;
        }
        self.devices
            .write()
            .await
            .insert(device.id.clone(), device);
        Ok(())
    }

    /// List all devices, sorted by name
    pub async fn list(&self) -> Vec<Device> {
        let devices = self.devices.read().await;
        let mut list: Vec<Device> = devices.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Get a device by id
    pub async fn get(&self, id: &str) -> Result<Device, AppError> {
        self.devices
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))
    }

    /// Current status of a device; cheap read used by the scheduler
    pub async fn status_of(&self, id: &str) -> Result<DeviceStatus, AppError> {
        Ok(self.get(id).await?.status)
    }

    /// Rename a device and/or replace its fingerprint
    ///
    /// The fingerprint is immutable while the device is active.
    pub async fn update(
        &self,
        id: &str,
        name: Option<String>,
        fingerprint: Option<serde_json::Value>,
    ) -> Result<Device, AppError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(id)
            .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))?;

        if fingerprint.is_some() && device.status != DeviceStatus::Stopped {
            return Err(AppError::InvalidState(
                "fingerprint may only be replaced while the device is stopped".to_string(),
            ));
        }

        if let Some(name) = name {
            device.name = name;
        }
        if let Some(fingerprint) = fingerprint {
            device.fingerprint = fingerprint;
        }
        device.validate().map_err(AppError::InvalidInput)?;

        self.store.upsert_device(device).await?;
        Ok(device.clone())
    }

    /// Attach a connector (or `None` for direct egress)
    ///
    /// Allowed only while the device is stopped; rejected with `Conflict`
    /// otherwise.
    pub async fn attach_connector(
        &self,
        id: &str,
        connector_id: Option<String>,
    ) -> Result<Device, AppError> {
        if let Some(connector_id) = &connector_id {
            // Existence check; enablement is enforced at start time
            self.connectors.get(connector_id).await?;
        }

        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(id)
            .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))?;

        if device.status != DeviceStatus::Stopped {
            return Err(AppError::Conflict(format!(
                "connector can only be changed while stopped, device is {:?}",
                device.status
            )));
        }

        device.connector_id = connector_id;
        self.store.upsert_device(device).await?;
        info!(device_id = %id, connector = ?device.connector_id, "Connector attachment changed");
        Ok(device.clone())
    }

    /// Start a device: allocate resources, boot the container, probe readiness
    ///
    /// Idempotent against concurrent duplicates: the per-device guard admits
    /// one transition; later callers observe the in-progress or final state.
    pub async fn start(&self, id: &str) -> Result<Device, AppError> {
        let guard = self.guard_for(id).await;
        let _held = guard.lock().await;

        // Re-check under the guard: another caller may have finished the transition
        let (connector_id, fingerprint, data_dir) = {
            let devices = self.devices.read().await;
            let device = devices
                .get(id)
                .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))?;
            match device.status {
                DeviceStatus::Starting | DeviceStatus::Running => return Ok(device.clone()),
                DeviceStatus::Stopping => {
                    return Err(AppError::InvalidState(
                        "device is stopping; wait for it to settle".to_string(),
                    ))
                }
                DeviceStatus::Stopped | DeviceStatus::Error => (
                    device.connector_id.clone(),
                    device.fingerprint.clone(),
                    device.data_dir.clone(),
                ),
            }
        };

        let egress = match &connector_id {
            Some(connector_id) => self.connectors.resolve_egress(connector_id).await?,
            None => EgressSpec::default(),
        };

        // Allocation lock is scoped to this call alone
        let control_port = self.ports.allocate()?;

        let spec = ContainerSpec {
            device_id: id.to_string(),
            image: self.config.device_image.clone(),
            control_port,
            data_dir,
            fingerprint,
            egress,
        };

        let container_ref = match self.runtime.create_container(&spec).await {
            Ok(container_ref) => container_ref,
            Err(e) => {
                self.ports.release(control_port);
                self.mark_error(id, &format!("container create failed: {}", e))
                    .await?;
                return Err(AppError::ExternalCollaborator(e.to_string()));
            }
        };

        self.transition(id, |device| {
            device.status = DeviceStatus::Starting;
            device.container_ref = Some(container_ref.clone());
            device.control_port = Some(control_port);
        })
        .await?;
        info!(device_id = %id, container = %container_ref, port = control_port, "Device starting");

        // Bounded readiness probe: container alive AND control channel
        // reachable AND first frame rendered
        let deadline = Instant::now() + self.config.readiness_timeout;
        let ready = loop {
            let report = self.probe(&container_ref, control_port).await;
            if report.ready() {
                break true;
            }
            if Instant::now() >= deadline {
                break false;
            }
            sleep(PROBE_INTERVAL).await;
        };

        if !ready {
            warn!(device_id = %id, "Readiness probe timed out; releasing resources");
            if let Err(e) = self.runtime.remove_container(&container_ref).await {
                warn!(device_id = %id, error = %e, "Container cleanup after failed start");
            }
            self.ports.release(control_port);
            self.mark_error(id, "readiness probe timed out").await?;
            return Err(AppError::Timeout(format!(
                "device did not become ready within {}s",
                self.config.readiness_timeout.as_secs()
            )));
        }

        let device = self
            .transition(id, |device| {
                device.status = DeviceStatus::Running;
                device.last_started_at = Some(Utc::now());
            })
            .await?;
        info!(device_id = %id, "Device running");
        Ok(device)
    }

    /// Stop a running device
    ///
    /// Any task executing against the device is asked to cancel first; the
    /// wait for acknowledgment is bounded so teardown cannot hang forever.
    pub async fn stop(&self, id: &str) -> Result<Device, AppError> {
        let guard = self.guard_for(id).await;
        let _held = guard.lock().await;

        let (container_ref, control_port) = {
            let devices = self.devices.read().await;
            let device = devices
                .get(id)
                .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))?;
            if device.status != DeviceStatus::Running {
                return Err(AppError::InvalidState(format!(
                    "stop requires a running device, status is {:?}",
                    device.status
                )));
            }
            match (&device.container_ref, device.control_port) {
                (Some(container_ref), Some(port)) => (container_ref.clone(), port),
                _ => {
                    return Err(AppError::Fatal(
                        "running device has no container binding".to_string(),
                    ))
                }
            }
        };

        self.transition(id, |device| device.status = DeviceStatus::Stopping)
            .await?;

        // Cooperative cancellation before teardown, so an in-flight step can
        // finish instead of being orphaned mid-write
        if let Some(queue) = self.queue.read().await.clone() {
            queue
                .cancel_active_for_device(id, self.config.cancel_ack_timeout)
                .await;
        }

        if let Err(e) = self.runtime.stop_container(&container_ref).await {
            warn!(device_id = %id, error = %e, "Container stop failed; forcing removal");
        }
        if let Err(e) = self.runtime.remove_container(&container_ref).await {
            self.ports.release(control_port);
            self.mark_error(id, &format!("container removal failed: {}", e))
                .await?;
            return Err(AppError::ExternalCollaborator(e.to_string()));
        }

        self.ports.release(control_port);
        let device = self
            .transition(id, |device| {
                device.status = DeviceStatus::Stopped;
                device.container_ref = None;
                device.control_port = None;
                device.last_stopped_at = Some(Utc::now());
            })
            .await?;
        info!(device_id = %id, "Device stopped");
        Ok(device)
    }

    /// Composite health snapshot; never mutates state
    pub async fn readiness(&self, id: &str) -> Result<ReadinessReport, AppError> {
        let device = self.get(id).await?;
        match (&device.container_ref, device.control_port) {
            (Some(container_ref), Some(port)) => Ok(self.probe(container_ref, port).await),
            _ => Ok(ReadinessReport::down()),
        }
    }

    /// Delete a stopped device
    ///
    /// Cascade-restrict: refused while unfinished tasks reference it.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let device = self.get(id).await?;
        if device.status != DeviceStatus::Stopped {
            return Err(AppError::InvalidState(
                "only stopped devices can be deleted".to_string(),
            ));
        }

        if let Some(queue) = self.queue.read().await.clone() {
            if queue.has_unfinished_tasks(id).await {
                return Err(AppError::Conflict(
                    "device has unfinished tasks; cancel them first".to_string(),
                ));
            }
            queue.forget_tasks_for_device(id).await?;
        }

        self.store.delete_tasks_for_device(id).await?;
        self.store.delete_device(id).await?;
        self.devices.write().await.remove(id);
        self.guards.lock().await.remove(id);

        if let Err(e) = std::fs::remove_dir_all(&device.data_dir) {
            warn!(device_id = %id, error = %e, "Device storage cleanup failed");
        }

        info!(device_id = %id, "Device deleted");
        Ok(())
    }

    // ---- internals ----

    async fn guard_for(&self, id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.lock().await;
        guards
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Apply a mutation under the device map lock and persist the row
    async fn transition<F>(&self, id: &str, mutate: F) -> Result<Device, AppError>
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(id)
            .ok_or_else(|| AppError::DeviceNotFound(id.to_string()))?;
        mutate(device);
        self.store.upsert_device(device).await?;
        Ok(device.clone())
    }

    async fn mark_error(&self, id: &str, detail: &str) -> Result<(), AppError> {
        warn!(device_id = %id, detail = %detail, "Device entering error state");
        self.transition(id, |device| {
            device.status = DeviceStatus::Error;
            device.container_ref = None;
            device.control_port = None;
        })
        .await?;
        Ok(())
    }

    async fn probe(&self, container_ref: &str, control_port: u16) -> ReadinessReport {
        let container_alive = self
            .runtime
            .is_alive(container_ref)
            .await
            .unwrap_or(false);

        let control_reachable = if container_alive {
            timeout(
                CONTROL_PROBE_TIMEOUT,
                TcpStream::connect((CONTROL_HOST, control_port)),
            )
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
        } else {
            false
        };

        let display_ready = if container_alive {
            self.runtime
                .display_ready(container_ref)
                .await
                .unwrap_or(false)
        } else {
            false
        };

        ReadinessReport {
            container_alive,
            control_reachable,
            display_ready,
        }
    }
}
