use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use mvault_core::error::Side;
use mvault_core::queue::MirrorPlanner;
use serde::Deserialize;

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/queue/copy", post(copy))
        .route("/api/queue/move", post(mv))
        .route("/api/queue/delete", post(del))
        .route("/api/queue/", get(list))
        .route("/api/queue/pause", post(pause))
        .route("/api/queue/resume", post(resume))
        .route("/api/queue/cancel/{id}", post(cancel))
        .route("/api/queue/{id}", delete(remove))
        .route("/api/queue/mirror/plan", post(mirror_plan))
        .route("/api/queue/mirror/execute", post(mirror_execute))
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str(s).ok_or_else(|| anyhow::anyhow!("side must be 'local' or 'lake', got {s:?}"))
}

#[derive(Deserialize)]
struct CopyRequest {
    src_side: String,
    src_relpath: String,
    dst_side: String,
    dst_relpath: String,
}

async fn copy(State(state): State<AppState>, Json(req): Json<CopyRequest>) -> ApiResult<Json<serde_json::Value>> {
    let id = state
        .queue
        .enqueue_copy(parse_side(&req.src_side)?, &req.src_relpath, parse_side(&req.dst_side)?, &req.dst_relpath)
        .await?;
    Ok(Json(serde_json::json!({"task_id": id})))
}

#[derive(Deserialize)]
struct MoveRequest {
    sides: Vec<String>,
    src_relpath: String,
    dst_relpath: String,
}

async fn mv(State(state): State<AppState>, Json(req): Json<MoveRequest>) -> ApiResult<Json<serde_json::Value>> {
    let sides: Vec<Side> = req.sides.iter().map(|s| parse_side(s)).collect::<anyhow::Result<_>>()?;
    let ids = state.queue.enqueue_move(&sides, &req.src_relpath, &req.dst_relpath).await?;
    Ok(Json(serde_json::json!({"task_ids": ids})))
}

#[derive(Deserialize)]
struct DeleteRequest {
    side: String,
    relpath: String,
    #[serde(default = "default_true")]
    respect_policy: bool,
}

fn default_true() -> bool {
    true
}

async fn del(State(state): State<AppState>, Json(req): Json<DeleteRequest>) -> ApiResult<Json<serde_json::Value>> {
    let side = parse_side(&req.side)?;
    let allow_delete = match side {
        Side::Local => state.config.local_allow_delete,
        Side::Lake => state.config.lake_allow_delete,
    };
    if req.respect_policy && !allow_delete {
        return Err(anyhow::anyhow!(mvault_core::error::VaultError::PolicyDenied(format!(
            "delete denied for side {side}"
        )))
        .into());
    }
    let id = state.queue.enqueue_delete(side, &req.relpath, req.respect_policy, allow_delete).await?;
    Ok(Json(serde_json::json!({"task_id": id})))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(state.queue.list().await?)?))
}

async fn pause(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.queue.pause();
    Json(serde_json::json!({"paused": true}))
}

async fn resume(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.queue.resume();
    Json(serde_json::json!({"paused": false}))
}

async fn cancel(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    let ok = state.queue.cancel(id).await?;
    Ok(Json(serde_json::json!({"cancelled": ok})))
}

async fn remove(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    let ok = state.queue.remove(id).await?;
    Ok(Json(serde_json::json!({"removed": ok})))
}

#[derive(Deserialize)]
struct MirrorRequest {
    src_side: String,
    src_folder: String,
    dst_side: String,
    dst_folder: String,
    #[serde(default)]
    allow_delete_on_dst: bool,
}

async fn mirror_plan(State(state): State<AppState>, Json(req): Json<MirrorRequest>) -> ApiResult<Json<serde_json::Value>> {
    let planner = MirrorPlanner::new(&state.differ, &state.queue);
    let plan = planner
        .plan(parse_side(&req.src_side)?, &req.src_folder, parse_side(&req.dst_side)?, &req.dst_folder)
        .await?;
    Ok(Json(serde_json::json!({
        "copies": plan.copies, "deletes": plan.deletes, "conflicts": plan.conflicts,
    })))
}

async fn mirror_execute(State(state): State<AppState>, Json(req): Json<MirrorRequest>) -> ApiResult<Json<serde_json::Value>> {
    let planner = MirrorPlanner::new(&state.differ, &state.queue);
    let plan = planner
        .execute(
            parse_side(&req.src_side)?,
            &req.src_folder,
            parse_side(&req.dst_side)?,
            &req.dst_folder,
            req.allow_delete_on_dst,
        )
        .await?;
    Ok(Json(serde_json::json!({
        "copies": plan.copies, "deletes": plan.deletes, "conflicts": plan.conflicts,
    })))
}
