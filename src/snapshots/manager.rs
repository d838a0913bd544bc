//! Snapshot manager
//!
//! Captures a stopped device's persistent storage as an immutable artifact
//! and restores it into brand-new devices. The source snapshot is never
//! consumed: a restore marks it `restoring` for the duration and returns it
//! to `ready` afterward.

use super::model::{Snapshot, SnapshotId, SnapshotStatus};
use crate::device::{Device, DeviceManager, DeviceStatus};
use crate::error::AppError;
use crate::store::FleetStore;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manages snapshot capture, restore, and deletion
pub struct SnapshotManager {
    snapshots: Arc<RwLock<HashMap<SnapshotId, Snapshot>>>,
    devices: Arc<DeviceManager>,
    store: Arc<FleetStore>,
    snapshot_root: PathBuf,
}

impl SnapshotManager {
    /// Create a manager storing captures under `snapshot_root`
    pub fn new(devices: Arc<DeviceManager>, store: Arc<FleetStore>, snapshot_root: PathBuf) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            devices,
            store,
            snapshot_root,
        }
    }

    /// Re-insert a snapshot loaded from the store at boot
    ///
    /// A capture or restore interrupted by shutdown settles to its resting
    /// state: `creating` becomes `failed`, `restoring` returns to `ready`.
    pub async fn adopt_recovered(&self, mut snapshot: Snapshot) -> Result<(), AppError> {
        match snapshot.status {
            SnapshotStatus::Creating => {
                snapshot.status = SnapshotStatus::Failed;
                self.store.upsert_snapshot(&snapshot).await?;
            }
            SnapshotStatus::Restoring => {
                snapshot.status = SnapshotStatus::Ready;
                self.store.upsert_snapshot(&snapshot).await?;
            }
            _ => {}
        }
        self.snapshots
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    /// Capture a stopped device's storage as a new snapshot
    pub async fn create(&self, device_id: &str, name: String) -> Result<Snapshot, AppError> {
        if name.trim().is_empty() {
            return Err(AppError::InvalidInput("snapshot name cannot be empty".to_string()));
        }

        let device = self.devices.get(device_id).await?;
        if device.status != DeviceStatus::Stopped {
            return Err(AppError::InvalidState(
                "snapshots require a stopped device".to_string(),
            ));
        }

        let mut snapshot = Snapshot::new(
            device.id.clone(),
            name,
            String::new(),
            device.name.clone(),
            device.fingerprint.clone(),
        );
        let storage_path = self.snapshot_root.join(&snapshot.id);
        snapshot.storage_path = storage_path.to_string_lossy().to_string();

        self.store.upsert_snapshot(&snapshot).await?;
        self.snapshots
            .write()
            .await
            .insert(snapshot.id.clone(), snapshot.clone());

        info!(snapshot_id = %snapshot.id, device_id = %device_id, "Snapshot capture started");

        let source = PathBuf::from(&device.data_dir);
        let target = storage_path.clone();
        let copy_result = tokio::task::spawn_blocking(move || {
            copy_dir_all(&source, &target)?;
            dir_size(&target)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Snapshot copy task panicked: {}", e)))?;

        match copy_result {
            Ok(size_bytes) => {
                let snapshot = self
                    .transition(&snapshot.id, |s| {
                        s.status = SnapshotStatus::Ready;
                        s.size_bytes = size_bytes;
                    })
                    .await?;
                info!(snapshot_id = %snapshot.id, size_bytes = size_bytes, "Snapshot ready");
                Ok(snapshot)
            }
            Err(e) => {
                warn!(snapshot_id = %snapshot.id, error = %e, "Snapshot capture failed");
                if let Err(cleanup) = std::fs::remove_dir_all(&storage_path) {
                    warn!(snapshot_id = %snapshot.id, error = %cleanup, "Capture cleanup failed");
                }
                let snapshot = self
                    .transition(&snapshot.id, |s| s.status = SnapshotStatus::Failed)
                    .await?;
                Err(AppError::Internal(anyhow::anyhow!(
                    "snapshot capture failed: {} (snapshot {} marked failed)",
                    e,
                    snapshot.id
                )))
            }
        }
    }

    /// List all snapshots, newest first
    pub async fn list(&self) -> Vec<Snapshot> {
        let snapshots = self.snapshots.read().await;
        let mut list: Vec<Snapshot> = snapshots.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Get a snapshot by id
    pub async fn get(&self, id: &str) -> Result<Snapshot, AppError> {
        self.snapshots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::SnapshotNotFound(id.to_string()))
    }

    /// Restore a snapshot into a brand-new stopped device
    ///
    /// The source device (if it still exists) is untouched; the snapshot is
    /// marked `restoring` only for the duration of the copy.
    pub async fn restore(
        &self,
        id: &str,
        new_name: Option<String>,
    ) -> Result<Device, AppError> {
        let snapshot = {
            let mut snapshots = self.snapshots.write().await;
            let snapshot = snapshots
                .get_mut(id)
                .ok_or_else(|| AppError::SnapshotNotFound(id.to_string()))?;
            if snapshot.status != SnapshotStatus::Ready {
                return Err(AppError::InvalidState(format!(
                    "restore requires a ready snapshot, status is {:?}",
                    snapshot.status
                )));
            }
            snapshot.status = SnapshotStatus::Restoring;
            snapshot.updated_at = Utc::now();
            snapshot.clone()
        };
        self.store.upsert_snapshot(&snapshot).await?;
        info!(snapshot_id = %id, "Restore started");

        let result = self.restore_inner(&snapshot, new_name).await;

        // The snapshot always returns to ready, restore success or not
        let settled = self
            .transition(id, |s| s.status = SnapshotStatus::Ready)
            .await;
        if let Err(e) = settled {
            warn!(snapshot_id = %id, error = %e, "Failed to settle snapshot after restore");
        }

        result
    }

    async fn restore_inner(
        &self,
        snapshot: &Snapshot,
        new_name: Option<String>,
    ) -> Result<Device, AppError> {
        let name = new_name.unwrap_or_else(|| format!("{} (restored)", snapshot.source_name));
        let device = self
            .devices
            .create(name, Some(snapshot.source_fingerprint.clone()))
            .await?;

        let source = PathBuf::from(&snapshot.storage_path);
        let target = PathBuf::from(&device.data_dir);
        let copy_result = tokio::task::spawn_blocking(move || copy_dir_all(&source, &target))
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Restore copy task panicked: {}", e)))?;

        if let Err(e) = copy_result {
            warn!(snapshot_id = %snapshot.id, device_id = %device.id, error = %e, "Restore copy failed");
            if let Err(cleanup) = self.devices.delete(&device.id).await {
                warn!(device_id = %device.id, error = %cleanup, "Cleanup of half-restored device failed");
            }
            return Err(AppError::Internal(anyhow::anyhow!(
                "restore copy failed: {}",
                e
            )));
        }

        info!(snapshot_id = %snapshot.id, device_id = %device.id, "Restore completed");
        Ok(device)
    }

    /// Delete a snapshot and its stored data
    ///
    /// Disallowed while a restore is reading from it or a capture is still
    /// writing it.
    pub async fn delete(&self, id: &str) -> Result<(), AppError> {
        let snapshot = self.get(id).await?;
        match snapshot.status {
            SnapshotStatus::Restoring => {
                return Err(AppError::InvalidState(
                    "snapshot is being restored; try again later".to_string(),
                ))
            }
            SnapshotStatus::Creating => {
                return Err(AppError::InvalidState(
                    "snapshot capture is still in progress".to_string(),
                ))
            }
            SnapshotStatus::Ready | SnapshotStatus::Failed => {}
        }

        self.store.delete_snapshot(id).await?;
        self.snapshots.write().await.remove(id);
        if let Err(e) = std::fs::remove_dir_all(&snapshot.storage_path) {
            // Failed captures may have nothing on disk
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(snapshot_id = %id, error = %e, "Snapshot storage cleanup failed");
            }
        }

        info!(snapshot_id = %id, "Snapshot deleted");
        Ok(())
    }

    async fn transition<F>(&self, id: &str, mutate: F) -> Result<Snapshot, AppError>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut snapshots = self.snapshots.write().await;
        let snapshot = snapshots
            .get_mut(id)
            .ok_or_else(|| AppError::SnapshotNotFound(id.to_string()))?;
        mutate(snapshot);
        snapshot.updated_at = Utc::now();
        self.store.upsert_snapshot(snapshot).await?;
        Ok(snapshot.clone())
    }
}

/// Recursively copy a directory tree
fn copy_dir_all(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let dest = target.join(entry.file_name());
        if file_type.is_dir() {
            copy_dir_all(&entry.path(), &dest)?;
        } else {
            std::fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Total size in bytes of a directory tree
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            total += dir_size(&entry.path())?;
        } else {
            total += metadata.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_dir_all_and_size() {
        let source = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let nested = source.path().join("apps");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(source.path().join("state.json"), b"{\"logged_in\":true}").unwrap();
        std::fs::write(nested.join("cache.bin"), b"012345").unwrap();

        let dest = target.path().join("copy");
        copy_dir_all(source.path(), &dest).unwrap();

        assert!(dest.join("state.json").exists());
        assert!(dest.join("apps").join("cache.bin").exists());
        assert_eq!(dir_size(&dest).unwrap(), 18 + 6);
    }

    #[test]
    fn test_dir_size_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(dir_size(dir.path()).unwrap(), 0);
    }
}
