//! Device entity and lifecycle status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a device
pub type DeviceId = String;

/// Device lifecycle status
///
/// Created in `Stopped`; `start` moves stopped → starting → running (or
/// error on failure); `stop` moves running → stopping → stopped. Deletion
/// is only permitted while stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// No container is bound
    Stopped,
    /// Container allocated, readiness probe in progress
    Starting,
    /// Container alive and the control channel is serving
    Running,
    /// Teardown in progress
    Stopping,
    /// The last start or stop failed; resources were released
    Error,
}

impl DeviceStatus {
    /// Whether a container and control port must be bound in this status
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Starting | DeviceStatus::Running | DeviceStatus::Stopping
        )
    }

    /// Whether `start` is legal from this status
    pub fn can_start(&self) -> bool {
        matches!(self, DeviceStatus::Stopped | DeviceStatus::Error)
    }
}

/// A named, independently addressable emulated endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// Unique identifier
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Current lifecycle status
    pub status: DeviceStatus,
    /// Backing container reference; bound iff the device is active
    pub container_ref: Option<String>,
    /// Allocated control port; bound iff the device is active
    pub control_port: Option<u16>,
    /// Opaque fingerprint configuration attached at creation
    pub fingerprint: serde_json::Value,
    /// Attached connector id; `None` means direct egress
    pub connector_id: Option<String>,
    /// Per-device persistent storage root
    pub data_dir: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the device last entered `running`
    pub last_started_at: Option<DateTime<Utc>>,
    /// When the device last returned to `stopped`
    pub last_stopped_at: Option<DateTime<Utc>>,
}

impl Device {
    /// Create a new device in the `stopped` state
    pub fn new(name: String, fingerprint: serde_json::Value, data_dir: String) -> Self {
        Self {
            id: Self::generate_id(),
            name,
            status: DeviceStatus::Stopped,
            container_ref: None,
            control_port: None,
            fingerprint,
            connector_id: None,
            data_dir,
            created_at: Utc::now(),
            last_started_at: None,
            last_stopped_at: None,
        }
    }

    /// Generate a new unique device ID
    pub fn generate_id() -> DeviceId {
        Uuid::new_v4().to_string()
    }

    /// Validate the device's fields
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Device name cannot be empty".to_string());
        }
        if !self.binding_invariant_holds() {
            return Err(format!(
                "container/port binding does not match status {:?}",
                self.status
            ));
        }
        Ok(())
    }

    /// Container ref and control port are bound iff the status is active
    pub fn binding_invariant_holds(&self) -> bool {
        let bound = self.container_ref.is_some() && self.control_port.is_some();
        let unbound = self.container_ref.is_none() && self.control_port.is_none();
        if self.status.is_active() {
            bound
        } else {
            unbound
        }
    }
}

/// Composite health snapshot returned by a readiness check
///
/// Read-only: probing never mutates device state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReadinessReport {
    /// The backing container is alive
    pub container_alive: bool,
    /// The control channel accepts connections
    pub control_reachable: bool,
    /// The display has produced its first frame
    pub display_ready: bool,
}

impl ReadinessReport {
    /// All probes passed
    pub fn ready(&self) -> bool {
        self.container_alive && self.control_reachable && self.display_ready
    }

    /// A report with every probe failed
    pub fn down() -> Self {
        Self {
            container_alive: false,
            control_reachable: false,
            display_ready: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_device_is_stopped_and_unbound() {
        let device = Device::new("pixel-1".to_string(), json!({}), "/tmp/d".to_string());
        assert_eq!(device.status, DeviceStatus::Stopped);
        assert!(device.container_ref.is_none());
        assert!(device.control_port.is_none());
        assert!(device.binding_invariant_holds());
    }

    #[test]
    fn test_binding_invariant_rejects_bound_stopped_device() {
        let mut device = Device::new("pixel-1".to_string(), json!({}), "/tmp/d".to_string());
        device.container_ref = Some("ctr-1".to_string());
        device.control_port = Some(6000);
        assert!(!device.binding_invariant_holds());

        device.status = DeviceStatus::Running;
        assert!(device.binding_invariant_holds());
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let device = Device::new("  ".to_string(), json!({}), "/tmp/d".to_string());
        assert!(device.validate().is_err());
    }

    #[test]
    fn test_can_start_from_stopped_and_error_only() {
        assert!(DeviceStatus::Stopped.can_start());
        assert!(DeviceStatus::Error.can_start());
        assert!(!DeviceStatus::Running.can_start());
        assert!(!DeviceStatus::Starting.can_start());
        assert!(!DeviceStatus::Stopping.can_start());
    }

    #[test]
    fn test_readiness_report_ready() {
        let report = ReadinessReport {
            container_alive: true,
            control_reachable: true,
            display_ready: true,
        };
        assert!(report.ready());
        assert!(!ReadinessReport::down().ready());
    }
}
