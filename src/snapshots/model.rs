//! Snapshot entity

use crate::device::DeviceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a snapshot
pub type SnapshotId = String;

/// Snapshot lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Capture in progress
    Creating,
    /// Immutable and restorable
    Ready,
    /// Capture failed; storage was cleaned up
    Failed,
    /// A restore is reading from it; deletion is blocked
    Restoring,
}

/// An immutable capture of a device's persistent storage
///
/// Owned by its source device but outlives it: deleting the device leaves
/// its snapshots restorable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Unique identifier
    pub id: SnapshotId,
    /// Source device id
    pub device_id: DeviceId,
    /// Display name
    pub name: String,
    /// Current status
    pub status: SnapshotStatus,
    /// Captured size in bytes
    pub size_bytes: u64,
    /// Storage location of the captured data
    pub storage_path: String,
    /// Source device name at capture time
    pub source_name: String,
    /// Source device fingerprint at capture time
    pub source_fingerprint: serde_json::Value,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot record in the `creating` state
    pub fn new(
        device_id: DeviceId,
        name: String,
        storage_path: String,
        source_name: String,
        source_fingerprint: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            device_id,
            name,
            status: SnapshotStatus::Creating,
            size_bytes: 0,
            storage_path,
            source_name,
            source_fingerprint,
            created_at: now,
            updated_at: now,
        }
    }
}
