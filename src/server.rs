//! HTTP control surface over the job service.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::JobConfig;
use crate::error::JobError;
use crate::job::model::{TaskInput, TaskStatus};
use crate::job::service::JobService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
}

/// Build the router. CORS is wide open — this is a local tool fronted by
/// a desktop UI.
pub fn routes(service: Arc<JobService>) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/health", get(health))
        .route("/autopilot/run", post(run_job))
        .route("/autopilot/jobs", get(list_jobs))
        .route("/autopilot/jobs/{id}", get(get_job).delete(delete_job))
        .route("/autopilot/status/{id}", get(get_job))
        .route("/autopilot/jobs/{id}/tasks", get(list_job_tasks))
        .route("/autopilot/jobs/{id}/stop", post(stop_job))
        .route("/autopilot/jobs/{id}/tasks/{task_id}/stop", post(stop_task))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(service: Arc<JobService>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}");
    axum::serve(listener, routes(service)).await?;
    Ok(())
}

fn error_response(err: JobError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match err {
        JobError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        JobError::NotFound => StatusCode::NOT_FOUND,
        JobError::Conflict(_) => StatusCode::CONFLICT,
    };
    (status, Json(serde_json::json!({"error": err.to_string()})))
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    tasks: Vec<TaskInput>,
    #[serde(default)]
    job_id: Option<String>,
    #[serde(default)]
    callback_url: Option<String>,
    #[serde(flatten)]
    config: JobConfig,
}

async fn run_job(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    match state
        .service
        .create_job(
            &request.tasks,
            request.config,
            request.job_id,
            request.callback_url,
        )
        .await
    {
        Ok(job) => {
            let status = job.status().await;
            (
                StatusCode::OK,
                Json(serde_json::json!({"job_id": job.id, "status": status})),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn get_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.get_job(&id).await {
        Ok(job) => (StatusCode::OK, Json(serde_json::json!(job.snapshot().await))),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct ListParams {
    status: Option<TaskStatus>,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let jobs = state.service.list_jobs(params.status).await;
    let mut snapshots = Vec::with_capacity(jobs.len());
    for job in jobs {
        snapshots.push(job.snapshot().await);
    }
    Json(snapshots)
}

async fn list_job_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.service.get_job_tasks(&id).await {
        Ok(tasks) => (StatusCode::OK, Json(serde_json::json!(tasks))),
        Err(e) => error_response(e),
    }
}

async fn delete_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.delete_job(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Job deleted"})),
        ),
        Err(e) => error_response(e),
    }
}

async fn stop_job(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.service.stop_job(&id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Stop requested"})),
        ),
        Err(e) => error_response(e),
    }
}

async fn stop_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(String, String)>,
) -> impl IntoResponse {
    match state.service.stop_task(&id, &task_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"message": "Stop requested"})),
        ),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_request_accepts_both_task_shapes_and_flattened_config() {
        let body = r#"{
            "tasks": ["plain task", {"id": "t-1", "text": "paired task"}],
            "callback_url": "http://server/api/jobs/j/callback",
            "model": "gemini-pro",
            "headless": true
        }"#;
        let request: RunRequest = serde_json::from_str(body).unwrap();
        assert_eq!(request.tasks.len(), 2);
        assert_eq!(request.tasks[1].id(), "t-1");
        assert!(request.job_id.is_none());
        assert_eq!(request.config.model, "gemini-pro");
        assert!(request.config.headless);
        assert_eq!(request.config.max_steps, 1000);
    }

    #[test]
    fn error_mapping() {
        let (status, _) = error_response(JobError::InvalidArgument("x".to_string()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = error_response(JobError::NotFound);
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = error_response(JobError::Conflict("x".to_string()));
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
