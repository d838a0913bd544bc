//! Fleet database operations
//!
//! Row persistence for devices, tasks, connectors, and snapshots. The
//! in-memory managers stay authoritative at runtime; every state transition
//! is written through here so the fleet can be reloaded after a restart.

use crate::connectors::{ConnectorHealth, ConnectorMeta};
use crate::device::{Device, DeviceStatus};
use crate::error::AppError;
use crate::queue::{Task, TaskPriority, TaskStatus, TraceEntry};
use crate::snapshots::{Snapshot, SnapshotStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Database connection pool for fleet state
pub struct FleetStore {
    pool: SqlitePool,
}

impl FleetStore {
    /// Initialize the database connection pool and apply migrations
    pub async fn new(db_path: &str) -> Result<Self, AppError> {
        // Ensure parent directory exists
        if let Some(parent) = PathBuf::from(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create db directory: {}", e))
            })?;
        }

        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid database path: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite database at: {}", db_path);

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database for tests
    ///
    /// Single connection: each SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid connection string: {}", e)))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), AppError> {
        debug!("Running database migrations");

        let migration_sql = include_str!("../../migrations/001_create_fleet.sql");

        // Strip comment lines and split into statements
        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            let without_comments = if let Some(comment_pos) = trimmed.find("--") {
                &trimmed[..comment_pos]
            } else {
                trimmed
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        let statements: Vec<&str> = cleaned_sql
            .split(';')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!("Database migrations completed");
        Ok(())
    }

    // ---- devices ----

    /// Insert or update a device row
    pub async fn upsert_device(&self, device: &Device) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO devices \
             (id, name, status, container_ref, control_port, fingerprint, connector_id, data_dir, \
              created_at, last_started_at, last_stopped_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
              name = excluded.name, status = excluded.status, \
              container_ref = excluded.container_ref, control_port = excluded.control_port, \
              fingerprint = excluded.fingerprint, connector_id = excluded.connector_id, \
              data_dir = excluded.data_dir, last_started_at = excluded.last_started_at, \
              last_stopped_at = excluded.last_stopped_at",
        )
        .bind(&device.id)
        .bind(&device.name)
        .bind(status_str(device.status))
        .bind(&device.container_ref)
        .bind(device.control_port.map(|p| p as i64))
        .bind(device.fingerprint.to_string())
        .bind(&device.connector_id)
        .bind(&device.data_dir)
        .bind(device.created_at)
        .bind(device.last_started_at)
        .bind(device.last_stopped_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a device row; fails while task rows still reference it
    pub async fn delete_device(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM devices WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load all device rows
    pub async fn load_devices(&self) -> Result<Vec<Device>, AppError> {
        let rows = sqlx::query("SELECT * FROM devices").fetch_all(&self.pool).await?;
        rows.iter().map(device_from_row).collect()
    }

    // ---- tasks ----

    /// Insert or update a task row
    pub async fn upsert_task(&self, task: &Task) -> Result<(), AppError> {
        let trace = serde_json::to_string(&task.trace)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode trace: {}", e)))?;

        sqlx::query(
            "INSERT INTO tasks \
             (id, device_id, instruction, output_format, status, priority, scheduled_at, \
              max_retries, retry_count, queue_seq, step_count, tokens_used, trace, result, error, \
              eligible_at, created_at, updated_at, started_at, finished_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
              status = excluded.status, priority = excluded.priority, \
              scheduled_at = excluded.scheduled_at, max_retries = excluded.max_retries, \
              retry_count = excluded.retry_count, queue_seq = excluded.queue_seq, \
              step_count = excluded.step_count, tokens_used = excluded.tokens_used, \
              trace = excluded.trace, result = excluded.result, error = excluded.error, \
              eligible_at = excluded.eligible_at, updated_at = excluded.updated_at, \
              started_at = excluded.started_at, finished_at = excluded.finished_at",
        )
        .bind(&task.id)
        .bind(&task.device_id)
        .bind(&task.instruction)
        .bind(&task.output_format)
        .bind(task_status_str(task.status))
        .bind(priority_str(task.priority))
        .bind(task.scheduled_at)
        .bind(task.max_retries as i64)
        .bind(task.retry_count as i64)
        .bind(task.queue_seq.map(|s| s as i64))
        .bind(task.step_count as i64)
        .bind(task.tokens_used as i64)
        .bind(trace)
        .bind(task.result.as_ref().map(|r| r.to_string()))
        .bind(&task.error)
        .bind(task.eligible_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.started_at)
        .bind(task.finished_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a task row
    pub async fn delete_task(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete all task rows for a device (called right before device deletion)
    pub async fn delete_tasks_for_device(&self, device_id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM tasks WHERE device_id = ?")
            .bind(device_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load all task rows
    pub async fn load_tasks(&self) -> Result<Vec<Task>, AppError> {
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    // ---- connectors ----

    /// Insert or update a connector row
    pub async fn upsert_connector(&self, meta: &ConnectorMeta) -> Result<(), AppError> {
        let config = serde_json::to_string(&meta.config)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode config: {}", e)))?;
        let kind = serde_json::to_string(&meta.kind)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode kind: {}", e)))?;

        sqlx::query(
            "INSERT INTO connectors \
             (id, name, kind, config, enabled, connected, healthy, detail, public_address, \
              created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
              name = excluded.name, kind = excluded.kind, config = excluded.config, \
              enabled = excluded.enabled, connected = excluded.connected, \
              healthy = excluded.healthy, detail = excluded.detail, \
              public_address = excluded.public_address, updated_at = excluded.updated_at",
        )
        .bind(&meta.id)
        .bind(&meta.name)
        .bind(kind.trim_matches('"'))
        .bind(config)
        .bind(meta.enabled)
        .bind(meta.connectivity.connected)
        .bind(meta.connectivity.healthy)
        .bind(&meta.connectivity.detail)
        .bind(&meta.public_address)
        .bind(meta.created_at)
        .bind(meta.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load all connector rows
    pub async fn load_connectors(&self) -> Result<Vec<ConnectorMeta>, AppError> {
        let rows = sqlx::query("SELECT * FROM connectors")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(connector_from_row).collect()
    }

    // ---- snapshots ----

    /// Insert or update a snapshot row
    pub async fn upsert_snapshot(&self, snapshot: &Snapshot) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO snapshots \
             (id, device_id, name, status, size_bytes, storage_path, source_name, \
              source_fingerprint, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(id) DO UPDATE SET \
              name = excluded.name, status = excluded.status, size_bytes = excluded.size_bytes, \
              storage_path = excluded.storage_path, updated_at = excluded.updated_at",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.device_id)
        .bind(&snapshot.name)
        .bind(snapshot_status_str(snapshot.status))
        .bind(snapshot.size_bytes as i64)
        .bind(&snapshot.storage_path)
        .bind(&snapshot.source_name)
        .bind(snapshot.source_fingerprint.to_string())
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a snapshot row
    pub async fn delete_snapshot(&self, id: &str) -> Result<(), AppError> {
        sqlx::query("DELETE FROM snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Load all snapshot rows
    pub async fn load_snapshots(&self) -> Result<Vec<Snapshot>, AppError> {
        let rows = sqlx::query("SELECT * FROM snapshots")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(snapshot_from_row).collect()
    }
}

// ---- row mapping ----

fn device_from_row(row: &SqliteRow) -> Result<Device, AppError> {
    let status: String = row.try_get("status")?;
    let fingerprint: String = row.try_get("fingerprint")?;
    Ok(Device {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        status: parse_enum(&status)?,
        container_ref: row.try_get("container_ref")?,
        control_port: row
            .try_get::<Option<i64>, _>("control_port")?
            .map(|p| p as u16),
        fingerprint: parse_json(&fingerprint)?,
        connector_id: row.try_get("connector_id")?,
        data_dir: row.try_get("data_dir")?,
        created_at: row.try_get("created_at")?,
        last_started_at: row.try_get("last_started_at")?,
        last_stopped_at: row.try_get("last_stopped_at")?,
    })
}

fn task_from_row(row: &SqliteRow) -> Result<Task, AppError> {
    let status: String = row.try_get("status")?;
    let priority: String = row.try_get("priority")?;
    let trace: String = row.try_get("trace")?;
    let result: Option<String> = row.try_get("result")?;
    Ok(Task {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        instruction: row.try_get("instruction")?,
        output_format: row.try_get("output_format")?,
        status: parse_enum::<TaskStatus>(&status)?,
        priority: parse_enum::<TaskPriority>(&priority)?,
        scheduled_at: row.try_get("scheduled_at")?,
        max_retries: row.try_get::<i64, _>("max_retries")? as u32,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        queue_seq: row.try_get::<Option<i64>, _>("queue_seq")?.map(|s| s as u64),
        step_count: row.try_get::<i64, _>("step_count")? as u32,
        tokens_used: row.try_get::<i64, _>("tokens_used")? as u64,
        trace: serde_json::from_str::<Vec<TraceEntry>>(&trace)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt trace column: {}", e)))?,
        result: result.as_deref().map(parse_json).transpose()?,
        error: row.try_get("error")?,
        eligible_at: row.try_get("eligible_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

fn connector_from_row(row: &SqliteRow) -> Result<ConnectorMeta, AppError> {
    let kind: String = row.try_get("kind")?;
    let config: String = row.try_get("config")?;
    Ok(ConnectorMeta {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind: parse_enum(&kind)?,
        config: serde_json::from_str(&config)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt config column: {}", e)))?,
        enabled: row.try_get("enabled")?,
        connectivity: ConnectorHealth {
            connected: row.try_get("connected")?,
            healthy: row.try_get("healthy")?,
            detail: row.try_get("detail")?,
        },
        public_address: row.try_get("public_address")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn snapshot_from_row(row: &SqliteRow) -> Result<Snapshot, AppError> {
    let status: String = row.try_get("status")?;
    let fingerprint: String = row.try_get("source_fingerprint")?;
    Ok(Snapshot {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        name: row.try_get("name")?,
        status: parse_enum::<SnapshotStatus>(&status)?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        storage_path: row.try_get("storage_path")?,
        source_name: row.try_get("source_name")?,
        source_fingerprint: parse_json(&fingerprint)?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Decode a snake_case enum column through its serde representation
fn parse_enum<T: serde::de::DeserializeOwned>(value: &str) -> Result<T, AppError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt enum column '{}': {}", value, e)))
}

fn parse_json(value: &str) -> Result<serde_json::Value, AppError> {
    serde_json::from_str(value)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Corrupt JSON column: {}", e)))
}

fn status_str(status: DeviceStatus) -> &'static str {
    match status {
        DeviceStatus::Stopped => "stopped",
        DeviceStatus::Starting => "starting",
        DeviceStatus::Running => "running",
        DeviceStatus::Stopping => "stopping",
        DeviceStatus::Error => "error",
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Scheduled => "scheduled",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Cancelled => "cancelled",
    }
}

fn priority_str(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Normal => "normal",
        TaskPriority::High => "high",
        TaskPriority::Urgent => "urgent",
    }
}

fn snapshot_status_str(status: SnapshotStatus) -> &'static str {
    match status {
        SnapshotStatus::Creating => "creating",
        SnapshotStatus::Ready => "ready",
        SnapshotStatus::Failed => "failed",
        SnapshotStatus::Restoring => "restoring",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TaskPriority;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn test_device_round_trip() {
        let store = FleetStore::in_memory().await.unwrap();
        let mut device = Device::new(
            "pixel-1".to_string(),
            json!({"model": "Pixel 7"}),
            "/data/devices/d1".to_string(),
        );
        store.upsert_device(&device).await.unwrap();

        device.status = DeviceStatus::Running;
        device.container_ref = Some("ctr-1".to_string());
        device.control_port = Some(6001);
        store.upsert_device(&device).await.unwrap();

        let loaded = store.load_devices().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].status, DeviceStatus::Running);
        assert_eq!(loaded[0].control_port, Some(6001));
        assert_eq!(loaded[0].fingerprint, json!({"model": "Pixel 7"}));
    }

    #[tokio::test]
    async fn test_task_round_trip_preserves_trace() {
        let store = FleetStore::in_memory().await.unwrap();
        let device = Device::new("pixel-1".to_string(), json!({}), "/d".to_string());
        store.upsert_device(&device).await.unwrap();

        let mut task = Task::new(
            device.id.clone(),
            "log into the app".to_string(),
            Some("json".to_string()),
            TaskPriority::Urgent,
            None,
            2,
        );
        task.trace.push(TraceEntry {
            step: 1,
            message: "tapped login button".to_string(),
            at: Utc::now(),
        });
        store.upsert_task(&task).await.unwrap();

        let loaded = store.load_tasks().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].priority, TaskPriority::Urgent);
        assert_eq!(loaded[0].trace.len(), 1);
        assert_eq!(loaded[0].trace[0].message, "tapped login button");
    }

    #[tokio::test]
    async fn test_device_delete_restricted_by_task_rows() {
        let store = FleetStore::in_memory().await.unwrap();
        let device = Device::new("pixel-1".to_string(), json!({}), "/d".to_string());
        store.upsert_device(&device).await.unwrap();

        let task = Task::new(
            device.id.clone(),
            "x".to_string(),
            None,
            TaskPriority::Normal,
            None,
            0,
        );
        store.upsert_task(&task).await.unwrap();

        // FK restricts the delete while a task row references the device
        assert!(store.delete_device(&device.id).await.is_err());

        store.delete_tasks_for_device(&device.id).await.unwrap();
        assert!(store.delete_device(&device.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_snapshot_survives_device_deletion() {
        let store = FleetStore::in_memory().await.unwrap();
        let device = Device::new("pixel-1".to_string(), json!({}), "/d".to_string());
        store.upsert_device(&device).await.unwrap();

        let snapshot = Snapshot::new(
            device.id.clone(),
            "baseline".to_string(),
            "/data/snapshots/s1".to_string(),
            device.name.clone(),
            json!({}),
        );
        store.upsert_snapshot(&snapshot).await.unwrap();

        store.delete_device(&device.id).await.unwrap();
        let loaded = store.load_snapshots().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].device_id, device.id);
    }
}
