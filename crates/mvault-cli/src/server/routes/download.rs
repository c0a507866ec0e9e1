use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::path::PathBuf;

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/downloader/jobs", post(add).get(list))
        .route("/api/downloader/jobs/{id}/start", post(start))
        .route("/api/downloader/jobs/{id}/cancel", post(cancel))
        .route("/api/downloader/jobs/cancel-all", post(cancel_all))
}

#[derive(Deserialize)]
struct AddRequest {
    url: String,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    dest: Option<PathBuf>,
    #[serde(default = "default_true")]
    record_source: bool,
}

fn default_true() -> bool {
    true
}

async fn add(State(state): State<AppState>, Json(req): Json<AddRequest>) -> ApiResult<Json<serde_json::Value>> {
    let target_root = req.dest.unwrap_or_else(|| state.config.local_models_root.clone());
    let id = state
        .downloader
        .enqueue(&req.url, req.filename.as_deref(), &target_root, req.record_source)
        .await?;
    Ok(Json(serde_json::json!({"job_id": id})))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(state.downloader.list().await?)?))
}

/// Jobs are admitted by the scheduler loop automatically once `queued`;
/// this endpoint is an idempotent acknowledgement that returns the job's
/// current state rather than triggering a new action.
async fn start(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(state.downloader.get(id).await?)?))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    state.downloader.cancel(id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn cancel_all(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.downloader.cancel_all().await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
