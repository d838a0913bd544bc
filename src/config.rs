//! Application configuration
//!
//! Centralized configuration management with environment variable support
//! and sensible defaults.

use std::env;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Device runtime configuration
    pub runtime: RuntimeConfig,
    /// Task execution configuration
    pub execution: ExecutionConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind the server to
    pub port: u16,
    /// Host address to bind to
    pub host: String,
}

/// Persistence configuration
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Base directory for device storage and snapshots
    pub data_dir: String,
    /// Path to the SQLite database file
    pub db_path: String,
}

/// Device runtime configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Container image used for emulated devices
    pub device_image: String,
    /// First control port in the allocatable range (inclusive)
    pub port_range_start: u16,
    /// Last control port in the allocatable range (inclusive)
    pub port_range_end: u16,
    /// Bound on the whole start readiness probe
    pub readiness_timeout: Duration,
    /// Bound on any single container-runtime invocation
    pub runtime_op_timeout: Duration,
    /// How long `stop` waits for a running task to acknowledge cancellation
    pub cancel_ack_timeout: Duration,
}

/// Task execution configuration
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Number of workers in the execution pool
    pub worker_count: usize,
    /// Maximum agent steps before a task is failed
    pub max_steps: u32,
    /// Bound on a single agent step
    pub step_timeout: Duration,
    /// How long an idle worker sleeps before polling the queue again
    pub poll_interval: Duration,
    /// Base delay for retry backoff (doubled per retry)
    pub retry_backoff_base: Duration,
    /// Upper bound on retry backoff
    pub retry_backoff_cap: Duration,
    /// Base URL of the external step agent service
    pub agent_base_url: String,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig {
                port: env_parse("PORT", 8080),
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            },
            persistence: PersistenceConfig {
                data_dir: env::var("DATA_DIR").unwrap_or_else(|_| {
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.device-farm", home.to_string_lossy())
                    } else {
                        ".device-farm".to_string()
                    }
                }),
                db_path: env::var("DB_PATH").unwrap_or_else(|_| {
                    if let Some(home) = env::var_os("HOME") {
                        format!("{}/.device-farm/fleet.db", home.to_string_lossy())
                    } else {
                        "fleet.db".to_string()
                    }
                }),
            },
            runtime: RuntimeConfig {
                device_image: env::var("DEVICE_IMAGE")
                    .unwrap_or_else(|_| "device-farm/android-emulator:latest".to_string()),
                port_range_start: env_parse("PORT_RANGE_START", 6000),
                port_range_end: env_parse("PORT_RANGE_END", 6999),
                readiness_timeout: Duration::from_secs(env_parse("READINESS_TIMEOUT_SECS", 60)),
                runtime_op_timeout: Duration::from_secs(env_parse("RUNTIME_OP_TIMEOUT_SECS", 30)),
                cancel_ack_timeout: Duration::from_secs(env_parse("CANCEL_ACK_TIMEOUT_SECS", 30)),
            },
            execution: ExecutionConfig {
                worker_count: env_parse("WORKER_COUNT", 4),
                max_steps: env_parse("MAX_STEPS", 50),
                step_timeout: Duration::from_secs(env_parse("STEP_TIMEOUT_SECS", 120)),
                poll_interval: Duration::from_millis(env_parse("POLL_INTERVAL_MS", 500)),
                retry_backoff_base: Duration::from_secs(env_parse("RETRY_BACKOFF_BASE_SECS", 5)),
                retry_backoff_cap: Duration::from_secs(env_parse("RETRY_BACKOFF_CAP_SECS", 300)),
                agent_base_url: env::var("AGENT_BASE_URL")
                    .unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
            },
        }
    }

    /// Get the server address as a string
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse an environment variable, falling back to the default on absence or parse failure
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
