//! HTTP JSON API.
//!
//! Every route is served at the root and again under `/api`, which is what
//! the bundled dashboard page calls. Handlers build the component they need
//! from the shared configuration and run file work on the blocking pool.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::Context as _;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, DataPaths};
use crate::core::agents::AgentDirectory;
use crate::core::classify::now_ms;
use crate::core::crons::CronStore;
use crate::core::goals::{GoalPatch, GoalStore, NewGoal};
use crate::core::memory::MemoryLog;
use crate::core::usage::{UsageAggregator, UsageSummary, latest_session_log, local_midnight_ms};
use crate::error::McError;
use crate::task::model::{NewTask, TaskStatus};
use crate::task::storage::TaskStore;

#[derive(Clone)]
pub struct AppState {
    cfg: Arc<Config>,
    paths: Arc<DataPaths>,
}

impl AppState {
    #[must_use]
    pub fn new(cfg: Config, paths: DataPaths) -> Self {
        Self {
            cfg: Arc::new(cfg),
            paths: Arc::new(paths),
        }
    }

    fn tasks(&self) -> TaskStore {
        TaskStore::new(&self.paths, self.cfg.tasks.clone())
    }

    fn goals(&self) -> GoalStore {
        GoalStore::new(self.paths.goals_file.clone())
    }

    fn crons(&self) -> CronStore {
        CronStore::new(self.paths.cron_jobs_file.clone())
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    error: String,
    detail: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            detail: None,
        }
    }

    /// Client errors keep their own message; anything else is reported under
    /// `context` with the cause as `detail`.
    fn from_mc(err: McError, context: &str) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "{context}");
            Self {
                status,
                error: context.to_owned(),
                detail: Some(err.to_string()),
            }
        } else {
            Self::new(status, err.to_string())
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.detail {
            Some(detail) => json!({ "error": self.error, "detail": detail }),
            None => json!({ "error": self.error }),
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

async fn blocking<T, F>(context: &'static str, f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, McError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| ApiError::from_mc(e, context)),
        Err(e) => Err(ApiError::from_mc(McError::Other(e.to_string()), context)),
    }
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/{id}", patch(update_task).delete(delete_task))
        .route("/goals", get(list_goals).post(create_goal))
        .route("/goals/{id}", patch(update_goal).delete(delete_goal))
        .route("/projects", get(list_projects))
        .route("/crons", get(list_crons))
        .route("/crons/{id}", patch(toggle_cron))
        .route("/memory", get(list_memory))
        .route("/usage", get(usage))
        .route("/agents", get(list_agents));

    Router::new()
        .route("/", get(dashboard))
        .merge(api.clone())
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(cfg: Config) -> anyhow::Result<()> {
    cfg.validate()?;
    let paths = cfg.data_paths()?;
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let app = router(AppState::new(cfg, paths));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "mission control listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn dashboard() -> Html<&'static str> {
    Html(include_str!("dashboard.html"))
}

async fn list_tasks(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let store = state.tasks();
    let tasks = blocking("Failed to read tasks", move || store.list()).await?;
    Ok(Json(json!({ "count": tasks.len(), "tasks": tasks })))
}

async fn create_task(
    State(state): State<AppState>,
    body: Result<Json<NewTask>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let Json(req) = body?;
    let store = state.tasks();
    let task = blocking("Failed to create task", move || store.create(req)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "task": task }))))
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    #[serde(default)]
    status: String,
}

async fn update_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<StatusBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body?;
    let status: TaskStatus = body
        .status
        .parse()
        .map_err(|e| ApiError::from_mc(e, "Failed to update task"))?;
    let store = state.tasks();
    let lookup = id.clone();
    let out = blocking("Failed to update task", move || {
        store.update_status(&lookup, status)
    })
    .await?;
    Ok(Json(json!({
        "ok": true,
        "id": id,
        "status": status,
        "source": out.source,
        "task": out.task,
    })))
}

async fn delete_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.tasks();
    blocking("Failed to delete task", move || store.delete(&id)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_goals(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let store = state.goals();
    let data = blocking("Failed to read goals", move || Ok(store.list())).await?;
    Ok(Json(json!({ "goals": data.goals })))
}

async fn create_goal(
    State(state): State<AppState>,
    body: Result<Json<NewGoal>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let Json(req) = body?;
    let store = state.goals();
    let goal = blocking("Failed to create goal", move || store.create(req)).await?;
    Ok((StatusCode::CREATED, Json(json!({ "goal": goal }))))
}

async fn update_goal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<GoalPatch>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(patch) = body?;
    let store = state.goals();
    let goal = blocking("Failed to update goal", move || store.update(&id, patch)).await?;
    Ok(Json(json!({ "goal": goal })))
}

async fn delete_goal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let store = state.goals();
    blocking("Failed to delete goal", move || store.delete(&id)).await?;
    Ok(Json(json!({ "ok": true })))
}

async fn list_projects(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let store = state.tasks();
    let projects = blocking("Failed to read projects", move || store.projects()).await?;
    Ok(Json(json!({ "count": projects.len(), "projects": projects })))
}

async fn list_crons(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let store = state.crons();
    let crons = blocking("Failed to read crons", move || store.list()).await?;
    Ok(Json(json!({ "crons": crons })))
}

#[derive(Debug, Deserialize)]
struct ToggleBody {
    enabled: bool,
}

async fn toggle_cron(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ToggleBody>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(body) = body?;
    let store = state.crons();
    let cron = blocking("Failed to update cron", move || {
        store.set_enabled(&id, body.enabled)
    })
    .await?;
    Ok(Json(json!({ "ok": true, "cron": cron })))
}

async fn list_memory(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let log = MemoryLog::new(state.paths.memory_dir.clone());
    let memories = blocking("Failed to read memory", move || log.list()).await?;
    Ok(Json(json!({ "count": memories.len(), "memories": memories })))
}

async fn usage(State(state): State<AppState>) -> ApiResult<Json<UsageSummary>> {
    let dir = state.paths.sessions_dir.clone();
    let latest = blocking("Failed to read usage", move || latest_session_log(&dir)).await?;
    let Some(path) = latest else {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "No sessions found"));
    };

    let summary = UsageAggregator::new(state.cfg.usage.clone())
        .aggregate_file(&path, local_midnight_ms())
        .await
        .map_err(|e| ApiError::from_mc(e, "Failed to read usage"))?;
    Ok(Json(summary))
}

async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let directory = AgentDirectory::new(
        state.paths.sessions_registry.clone(),
        state.cfg.agents.clone(),
    );
    let crons = state.crons();
    let now = now_ms();
    let agents = blocking("Failed to read agents", move || {
        Ok(directory.snapshot(crons.read_jobs(), now))
    })
    .await?;
    Ok(Json(json!({ "agents": agents, "generatedAt": now })))
}
