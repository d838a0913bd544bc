//! Device storage snapshots

mod manager;
mod model;

pub use manager::SnapshotManager;
pub use model::{Snapshot, SnapshotId, SnapshotStatus};
