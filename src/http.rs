use crate::config::ConfigError;
use crate::manager::{ManagerError, ManagerSnapshot, Published, SharedManager};
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ControlState {
    pub metrics: Arc<Metrics>,
    pub manager: SharedManager,
    pub published: watch::Receiver<Published>,
    pub shutdown: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error("задача запуска проверок прервана: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Manager(ManagerError::NotReady) => StatusCode::CONFLICT,
            Self::Manager(ManagerError::UnknownCheck(_)) => StatusCode::NOT_FOUND,
            Self::Manager(ManagerError::Aggregation(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Manager(ManagerError::Config(ConfigError::PathNotFound(_))) => {
                StatusCode::NOT_FOUND
            }
            Self::Manager(ManagerError::Config(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ScoreReply {
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct ScoreView {
    pub score: Option<f64>,
    pub ready: bool,
}

#[derive(Debug, Serialize)]
pub struct RerunReply {
    pub rerun: usize,
}

#[derive(Debug, Deserialize)]
pub struct ConfigQuery {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetConfigRequest {
    pub path: String,
    pub value: serde_yaml::Value,
}

pub fn build_router(state: ControlState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/run/all", post(run_all_handler))
        .route("/api/run/check/:name", post(run_check_handler))
        .route("/api/run/needed", post(run_needed_handler))
        .route("/api/score", get(score_handler))
        .route("/api/config", get(get_config_handler).put(set_config_handler))
        .route("/api/quit", post(quit_handler))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<ControlState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<ControlState>) -> Json<ManagerSnapshot> {
    let guard = state.manager.lock().await;
    Json(guard.snapshot(Instant::now()))
}

// Run handlers work in their own task so a client hanging up mid-run does
// not cut a pass short.
async fn run_all_handler(
    State(state): State<ControlState>,
) -> Result<Json<ScoreReply>, ControlError> {
    state.metrics.inc_control_request("run_all");
    let (manager, metrics) = (state.manager.clone(), state.metrics.clone());
    let score = tokio::spawn(async move {
        let mut guard = manager.lock().await;
        let now = Instant::now();
        let outcome = guard.run_all(now).await;
        metrics.update_from_snapshot(&guard.snapshot(now));
        outcome
    })
    .await??;
    Ok(Json(ScoreReply { score }))
}

async fn run_check_handler(
    State(state): State<ControlState>,
    Path(name): Path<String>,
) -> Result<Json<ScoreReply>, ControlError> {
    state.metrics.inc_control_request("run_check");
    let (manager, metrics) = (state.manager.clone(), state.metrics.clone());
    let score = tokio::spawn(async move {
        let mut guard = manager.lock().await;
        let now = Instant::now();
        let outcome = guard.run_one(&name, now).await;
        metrics.update_from_snapshot(&guard.snapshot(now));
        outcome
    })
    .await??;
    Ok(Json(ScoreReply { score }))
}

async fn run_needed_handler(
    State(state): State<ControlState>,
) -> Result<Json<RerunReply>, ControlError> {
    state.metrics.inc_control_request("run_needed");
    let (manager, metrics) = (state.manager.clone(), state.metrics.clone());
    let rerun = tokio::spawn(async move {
        let mut guard = manager.lock().await;
        let now = Instant::now();
        let rerun = guard.run_needed(now).await?;
        metrics.update_from_snapshot(&guard.snapshot(now));
        Ok::<_, ManagerError>(rerun)
    })
    .await??;
    Ok(Json(RerunReply { rerun }))
}

async fn score_handler(State(state): State<ControlState>) -> Result<Json<ScoreView>, ControlError> {
    state.metrics.inc_control_request("score");
    let published = state.published.borrow().clone();
    if let Some(err) = published.degenerate {
        return Err(ManagerError::Aggregation(err).into());
    }
    Ok(Json(ScoreView {
        score: published.score,
        ready: published.ready,
    }))
}

async fn get_config_handler(
    State(state): State<ControlState>,
    Query(query): Query<ConfigQuery>,
) -> Result<Json<serde_yaml::Value>, ControlError> {
    state.metrics.inc_control_request("get_config");
    let value = state.published.borrow().get_config(&query.path)?;
    Ok(Json(value))
}

async fn set_config_handler(
    State(state): State<ControlState>,
    Json(request): Json<SetConfigRequest>,
) -> Result<StatusCode, ControlError> {
    state.metrics.inc_control_request("set_config");
    let mut guard = state.manager.lock().await;
    guard.set_config(&request.path, request.value)?;
    state.metrics.update_from_snapshot(&guard.snapshot(Instant::now()));
    Ok(StatusCode::NO_CONTENT)
}

async fn quit_handler(State(state): State<ControlState>) -> impl IntoResponse {
    state.metrics.inc_control_request("quit");
    state.shutdown.send_replace(true);
    (StatusCode::ACCEPTED, Json(json!({ "status": "stopping" })))
}
