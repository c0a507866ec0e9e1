use axum::extract::{Path, State};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use mvault_core::source::SourceRegistry;
use serde::Deserialize;

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/index/sources/{hash}", get(get_by_hash).put(put_by_hash).delete(delete_by_hash))
        .route(
            "/api/index/sources/by-relpath/{relpath}",
            get(get_by_relpath).put(put_by_relpath).delete(delete_by_relpath),
        )
}

#[derive(Deserialize)]
struct UpsertRequest {
    url: String,
    #[serde(default)]
    filename_hint: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn get_by_hash(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    Ok(Json(serde_json::to_value(registry.get_by_hash(&hash).await?)?))
}

async fn put_by_hash(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(req): Json<UpsertRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    registry
        .upsert_for_hash(&hash, &req.url, req.filename_hint.as_deref(), req.notes.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn delete_by_hash(State(state): State<AppState>, Path(hash): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    registry.delete_by_hash(&hash).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn get_by_relpath(State(state): State<AppState>, Path(relpath): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    Ok(Json(serde_json::to_value(registry.get_by_relpath(&relpath).await?)?))
}

async fn put_by_relpath(
    State(state): State<AppState>,
    Path(relpath): Path<String>,
    Json(req): Json<UpsertRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    registry
        .upsert_for_relpath(&relpath, &req.url, req.filename_hint.as_deref(), req.notes.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

async fn delete_by_relpath(State(state): State<AppState>, Path(relpath): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = SourceRegistry::new(state.store.clone());
    registry.delete_by_relpath(&relpath).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}
