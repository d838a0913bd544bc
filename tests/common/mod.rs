//! Shared test fixtures: an in-memory fleet with a fake container runtime
//! and a scriptable step agent.

use async_trait::async_trait;
use device_farm_backend::agent::{AgentError, AgentStep, StepContext, StepOutcome, StepResult};
use device_farm_backend::config::{
    Config, ExecutionConfig, PersistenceConfig, RuntimeConfig, ServerConfig,
};
use device_farm_backend::device::{ContainerRuntime, ContainerSpec, RuntimeError};
use device_farm_backend::queue::{TaskQueue, TaskStatus};
use device_farm_backend::state::AppState;
use device_farm_backend::store::FleetStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// Container runtime double: containers exist only as counters
pub struct FakeRuntime {
    healthy: AtomicBool,
    created: AtomicU64,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            created: AtomicU64::new(0),
        }
    }

    /// Flip readiness; unhealthy containers never pass the probe
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("fake-{}-{}", spec.device_id, n))
    }

    async fn stop_container(&self, _container_ref: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn remove_container(&self, _container_ref: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn is_alive(&self, _container_ref: &str) -> Result<bool, RuntimeError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn display_ready(&self, _container_ref: &str) -> Result<bool, RuntimeError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }
}

/// Step agent double driven by a pre-loaded script
///
/// Pops one scripted result per call; when the script runs dry it keeps
/// returning `Continue` so step budgets can be exercised.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Result<StepResult, AgentError>>>,
    step_delay: Duration,
    calls: AtomicU32,
}

impl ScriptedAgent {
    pub fn new(step_delay: Duration) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            step_delay,
            calls: AtomicU32::new(0),
        }
    }

    pub async fn push(&self, outcome: StepOutcome, summary: &str, tokens: u64) {
        self.script.lock().await.push_back(Ok(StepResult {
            outcome,
            summary: summary.to_string(),
            tokens_used: tokens,
        }));
    }

    pub async fn push_error(&self, error: AgentError) {
        self.script.lock().await.push_back(Err(error));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentStep for ScriptedAgent {
    async fn run_step(&self, _context: &StepContext) -> Result<StepResult, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.step_delay).await;
        match self.script.lock().await.pop_front() {
            Some(result) => result,
            None => Ok(StepResult {
                outcome: StepOutcome::Continue,
                summary: "idle step".to_string(),
                tokens_used: 1,
            }),
        }
    }
}

/// A fleet over an in-memory store, a fake runtime, and live control-port
/// listeners so readiness probes pass
pub struct TestFleet {
    pub state: Arc<AppState>,
    pub runtime: Arc<FakeRuntime>,
    pub config: Config,
    _data_dir: TempDir,
    _listeners: Vec<TcpListener>,
}

/// Build a test configuration over the given control-port range
pub fn test_config(port_start: u16, port_end: u16, data_dir: &std::path::Path) -> Config {
    Config {
        server: ServerConfig {
            port: 0,
            host: "127.0.0.1".to_string(),
        },
        persistence: PersistenceConfig {
            data_dir: data_dir.to_string_lossy().to_string(),
            db_path: data_dir.join("fleet.db").to_string_lossy().to_string(),
        },
        runtime: RuntimeConfig {
            device_image: "device-farm/test:latest".to_string(),
            port_range_start: port_start,
            port_range_end: port_end,
            readiness_timeout: Duration::from_millis(500),
            runtime_op_timeout: Duration::from_secs(2),
            cancel_ack_timeout: Duration::from_secs(3),
        },
        execution: ExecutionConfig {
            worker_count: 2,
            max_steps: 5,
            step_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(25),
            retry_backoff_base: Duration::from_millis(20),
            retry_backoff_cap: Duration::from_millis(100),
            agent_base_url: "http://127.0.0.1:1".to_string(),
        },
    }
}

/// Spin up a fleet whose control ports in `port_start..=port_end` accept TCP
pub async fn fleet(port_start: u16, port_end: u16) -> TestFleet {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let config = test_config(port_start, port_end, data_dir.path());

    let mut listeners = Vec::new();
    for port in port_start..=port_end {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap_or_else(|e| panic!("bind control port {}: {}", port, e));
        listeners.push(listener);
    }

    let runtime = Arc::new(FakeRuntime::new());
    let store = Arc::new(FleetStore::in_memory().await.expect("store"));
    let state = Arc::new(
        AppState::with_store(config.clone(), runtime.clone(), store)
            .await
            .expect("state"),
    );

    TestFleet {
        state,
        runtime,
        config,
        _data_dir: data_dir,
        _listeners: listeners,
    }
}

/// Poll until the task reaches the given status or the deadline passes
pub async fn wait_for_task_status(
    queue: &TaskQueue,
    task_id: &str,
    status: TaskStatus,
    deadline: Duration,
) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    loop {
        let reached = queue
            .get(task_id)
            .await
            .map(|t| t.status == status)
            .unwrap_or(false);
        if reached {
            return true;
        }
        if tokio::time::Instant::now() >= end {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
