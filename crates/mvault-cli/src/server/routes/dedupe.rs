use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mvault_core::error::Side;
use mvault_core::hasher::HashMode;
use serde::Deserialize;
use std::collections::HashMap;

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/dedupe/scan", post(scan))
        .route("/api/dedupe/results/{scan_id}", get(results))
        .route("/api/dedupe/execute", post(execute))
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str(s).ok_or_else(|| anyhow::anyhow!("side must be 'local' or 'lake', got {s:?}"))
}

fn parse_mode(s: &str) -> anyhow::Result<HashMode> {
    match s {
        "full" => Ok(HashMode::Full),
        "fast" => Ok(HashMode::Fast),
        other => anyhow::bail!("mode must be 'full' or 'fast', got {other:?}"),
    }
}

#[derive(Deserialize)]
struct ScanRequest {
    side: String,
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default)]
    min_size: i64,
}

fn default_mode() -> String {
    "full".to_string()
}

async fn scan(State(state): State<AppState>, Json(req): Json<ScanRequest>) -> ApiResult<Json<serde_json::Value>> {
    let side = parse_side(&req.side)?;
    let root = state.roots.of(side);
    let summary = state.dedupe.scan(side, root, parse_mode(&req.mode)?, req.min_size).await?;
    Ok(Json(serde_json::to_value(summary)?))
}

async fn results(State(state): State<AppState>, Path(scan_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(serde_json::to_value(state.dedupe.results(&scan_id).await?)?))
}

#[derive(Deserialize)]
struct ExecuteRequest {
    side: String,
    scan_id: String,
    selections: HashMap<i64, String>,
}

async fn execute(State(state): State<AppState>, Json(req): Json<ExecuteRequest>) -> ApiResult<Json<serde_json::Value>> {
    let side = parse_side(&req.side)?;
    let root = state.roots.of(side);
    let result = state.dedupe.execute(side, root, &req.scan_id, &req.selections).await?;
    Ok(Json(serde_json::to_value(result)?))
}
