use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mvault_core::error::Side;
use serde::{Deserialize, Serialize};

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/index/refresh", post(refresh))
        .route("/api/index/files", get(files))
        .route("/api/index/folders", get(folders))
        .route("/api/index/diff", get(diff))
        .route("/api/index/stats", get(stats))
        .route("/api/index/verify", post(verify))
}

fn parse_side(s: &str) -> anyhow::Result<Side> {
    Side::from_str(s).ok_or_else(|| anyhow::anyhow!("side must be 'local' or 'lake', got {s:?}"))
}

#[derive(Deserialize)]
struct RefreshRequest {
    side: String,
}

#[derive(Serialize)]
struct RefreshResult {
    side: String,
    indexed: usize,
}

async fn refresh(State(state): State<AppState>, Json(req): Json<RefreshRequest>) -> ApiResult<Json<Vec<RefreshResult>>> {
    let sides: Vec<Side> = match req.side.as_str() {
        "both" => vec![Side::Local, Side::Lake],
        other => vec![parse_side(other)?],
    };
    let mut out = Vec::with_capacity(sides.len());
    for side in sides {
        let root = state.roots.of(side);
        let indexed = state.indexer.scan_side(side, root).await?;
        out.push(RefreshResult { side: side.as_str().to_string(), indexed });
    }
    Ok(Json(out))
}

#[derive(Deserialize)]
struct FilesQuery {
    side: String,
    #[serde(default)]
    folder: String,
    #[serde(default)]
    query: String,
}

async fn files(State(state): State<AppState>, Query(q): Query<FilesQuery>) -> ApiResult<Json<serde_json::Value>> {
    let side = parse_side(&q.side)?;
    let records = state.indexer.get_files(side, &q.folder, &q.query).await?;
    let json: Vec<_> = records
        .into_iter()
        .map(|r| {
            serde_json::json!({
                "relpath": r.relpath,
                "size": r.size,
                "mtime_ns": r.mtime_ns,
                "hash": r.hash,
            })
        })
        .collect();
    Ok(Json(serde_json::Value::Array(json)))
}

#[derive(Deserialize)]
struct FoldersQuery {
    side: String,
    #[serde(default)]
    parent: String,
}

async fn folders(State(state): State<AppState>, Query(q): Query<FoldersQuery>) -> ApiResult<Json<Vec<String>>> {
    let side = parse_side(&q.side)?;
    Ok(Json(state.indexer.get_folders(side, &q.parent).await?))
}

#[derive(Deserialize)]
struct DiffQuery {
    #[serde(default)]
    folder: String,
    #[serde(default)]
    query: String,
}

async fn diff(State(state): State<AppState>, Query(q): Query<DiffQuery>) -> ApiResult<Json<serde_json::Value>> {
    let entries = state.differ.compute_diff(&q.folder, &q.query).await?;
    Ok(Json(serde_json::to_value(entries)?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let local = state.indexer.get_stats(Side::Local).await?;
    let lake = state.indexer.get_stats(Side::Lake).await?;
    Ok(Json(serde_json::json!({
        "local": {"file_count": local.file_count, "total_bytes": local.total_bytes, "hashed_count": local.hashed_count},
        "lake": {"file_count": lake.file_count, "total_bytes": lake.total_bytes, "hashed_count": lake.hashed_count},
    })))
}

#[derive(Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    relpath: Option<String>,
    #[serde(default)]
    folder: Option<String>,
}

async fn verify(State(state): State<AppState>, Json(req): Json<VerifyRequest>) -> ApiResult<Json<serde_json::Value>> {
    let target = req.folder.or(req.relpath).unwrap_or_default();
    let id = state.queue.enqueue_verify(&target).await?;
    Ok(Json(serde_json::json!({"task_id": id})))
}
