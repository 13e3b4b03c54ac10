//! Thin read-only HTTP surface over the core engine. Not a primary
//! deliverable — it exists so `videomemoryd record` has a runnable status
//! surface comparable to the teacher's API, kept intentionally small.
//!
//! Endpoints:
//!   GET /api/status          → task/device counts, uptime
//!   GET /api/tasks           → all tasks (optionally ?io_id=...)
//!   GET /api/devices         → all known cameras

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::device::io_manager::IoManager;
use crate::manager::TaskManager;

/// Shared state passed to all handlers.
pub struct AppState {
    pub manager: Arc<TaskManager>,
    pub io_manager: Arc<IoManager>,
    pub started_at: Instant,
}

#[derive(Deserialize)]
pub struct TasksParams {
    io_id: Option<String>,
}

#[derive(Serialize)]
struct TaskView {
    task_id: String,
    task_number: usize,
    io_id: String,
    task_desc: String,
    done: bool,
    status: String,
    latest_note: Option<String>,
}

#[derive(Serialize)]
struct DeviceView {
    io_id: String,
    name: String,
    source: String,
    category: String,
}

#[derive(Serialize)]
struct StatusResponse {
    uptime_secs: u64,
    task_count: usize,
    device_count: usize,
}

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handle_status))
        .route("/api/tasks", get(handle_tasks))
        .route("/api/devices", get(handle_devices))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server. Runs until the process exits or the listener fails.
pub async fn start_server(state: Arc<AppState>, port: u16) {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    info!(port, "HTTP API listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}

async fn handle_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let task_count = state.manager.list_tasks(None).len();
    let device_count = state.io_manager.list(true).len();
    let resp = StatusResponse {
        uptime_secs: state.started_at.elapsed().as_secs(),
        task_count,
        device_count,
    };
    (StatusCode::OK, axum::Json(resp))
}

async fn handle_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TasksParams>,
) -> impl IntoResponse {
    let tasks: Vec<TaskView> = state
        .manager
        .list_tasks(params.io_id.as_deref())
        .into_iter()
        .map(|t| TaskView {
            task_id: t.task_id.clone(),
            task_number: t.task_number,
            io_id: t.io_id.clone(),
            task_desc: t.task_desc(),
            done: t.is_done(),
            status: t.status.as_str().to_string(),
            latest_note: t.latest_note().map(|n| n.content),
        })
        .collect();
    (StatusCode::OK, axum::Json(tasks))
}

async fn handle_devices(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let devices: Vec<DeviceView> = state
        .io_manager
        .list(false)
        .into_iter()
        .map(|d| DeviceView {
            io_id: d.io_id,
            name: d.name,
            source: match d.source {
                crate::model::DeviceSource::Local => "local".to_string(),
                crate::model::DeviceSource::Network => "network".to_string(),
            },
            category: d.category,
        })
        .collect();
    (StatusCode::OK, axum::Json(devices))
}
