//! Device Farm Backend
//!
//! A REST API server orchestrating a fleet of container-backed emulated
//! devices: lifecycle management, task queueing and execution through an
//! external step agent, egress connectors, and storage snapshots.

use axum::{
    extract::Request,
    extract::State,
    middleware::Next,
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use device_farm_backend::agent::HttpAgentClient;
use device_farm_backend::api;
use device_farm_backend::config::Config;
use device_farm_backend::device::DockerRuntime;
use device_farm_backend::queue::run_scheduler;
use device_farm_backend::state::AppState;
use device_farm_backend::worker::WorkerPool;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    devices: usize,
    tasks_running: usize,
}

/// Request ID middleware - adds unique ID to each request for tracing
async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status().as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!("Configuration loaded: {:?}", config);

    // Initialize application state against the container runtime
    let runtime = Arc::new(DockerRuntime::new(config.runtime.runtime_op_timeout));
    let state = Arc::new(AppState::initialize(config.clone(), runtime).await?);

    // Background services: admission scheduler and execution workers
    let (scheduler_shutdown_tx, scheduler_shutdown_rx) = watch::channel(false);
    tokio::spawn(run_scheduler(
        state.queue.clone(),
        config.execution.poll_interval,
        scheduler_shutdown_rx,
    ));

    let agent = Arc::new(HttpAgentClient::new(
        reqwest::Client::new(),
        config.execution.agent_base_url.clone(),
    ));
    let pool = WorkerPool::spawn(
        state.queue.clone(),
        state.devices.clone(),
        agent,
        config.execution.clone(),
    );

    // Build our application with routes
    let app = Router::new()
        .route("/api/health", get(health_check))
        // Device API
        .route(
            "/api/devices",
            get(api::devices::list_devices).post(api::devices::create_device),
        )
        .route(
            "/api/devices/:id",
            get(api::devices::get_device)
                .put(api::devices::update_device)
                .delete(api::devices::delete_device),
        )
        .route("/api/devices/:id/start", post(api::devices::start_device))
        .route("/api/devices/:id/stop", post(api::devices::stop_device))
        .route(
            "/api/devices/:id/connector",
            put(api::devices::attach_connector),
        )
        .route(
            "/api/devices/:id/readiness",
            get(api::devices::device_readiness),
        )
        .route("/api/devices/:id/tasks", get(api::tasks::list_device_tasks))
        // Task API
        .route("/api/tasks", post(api::tasks::submit_task))
        .route("/api/tasks/stats", get(api::tasks::queue_stats))
        .route(
            "/api/tasks/:id",
            get(api::tasks::get_task).delete(api::tasks::delete_task),
        )
        .route("/api/tasks/:id/admit", post(api::tasks::admit_task))
        .route("/api/tasks/:id/cancel", post(api::tasks::cancel_task))
        .route("/api/tasks/:id/retry", post(api::tasks::retry_task))
        .route("/api/tasks/:id/events", get(api::events::task_events))
        // Connector API
        .route(
            "/api/connectors",
            get(api::connectors::list_connectors).post(api::connectors::create_connector),
        )
        .route("/api/connectors/:id", get(api::connectors::get_connector))
        .route(
            "/api/connectors/:id/config",
            put(api::connectors::configure_connector),
        )
        .route(
            "/api/connectors/:id/enable",
            post(api::connectors::enable_connector),
        )
        .route(
            "/api/connectors/:id/disable",
            post(api::connectors::disable_connector),
        )
        .route(
            "/api/connectors/:id/connect",
            post(api::connectors::connect_connector),
        )
        .route(
            "/api/connectors/:id/disconnect",
            post(api::connectors::disconnect_connector),
        )
        .route(
            "/api/connectors/:id/status",
            get(api::connectors::connector_status),
        )
        .route(
            "/api/connectors/:id/routes",
            get(api::connectors::connector_routes),
        )
        .route(
            "/api/connectors/:id/address",
            get(api::connectors::connector_address),
        )
        // Snapshot API
        .route(
            "/api/snapshots",
            get(api::snapshots::list_snapshots).post(api::snapshots::create_snapshot),
        )
        .route(
            "/api/snapshots/:id",
            get(api::snapshots::get_snapshot).delete(api::snapshots::delete_snapshot),
        )
        .route(
            "/api/snapshots/:id/restore",
            post(api::snapshots::restore_snapshot),
        )
        // Middleware (order matters - request_id should be first)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .layer(CorsLayer::permissive()) // Allow CORS for development
        .with_state(state.clone());

    // Bind to address from config
    let addr: SocketAddr = config
        .server_addr()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid server address: {}", e))?;

    info!("🚀 Server running on http://{}", addr);
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // Setup graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background services after the listener closes
    let _ = scheduler_shutdown_tx.send(true);
    pool.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle graceful shutdown signals (Ctrl+C, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let devices = state.devices.list().await.len();
    let stats = state.queue.stats().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        devices,
        tasks_running: stats.running,
    })
}
