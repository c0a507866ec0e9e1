//! Minimal bundle CRUD.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use mvault_core::bundle::BundleRegistry;
use serde::Deserialize;

use crate::server::error::ApiResult;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/bundles", post(create).get(list))
        .route("/api/bundles/{name}", get(get_one).delete(delete_one))
        .route("/api/bundles/{name}/assets", post(add_asset))
        .route("/api/bundles/{name}/assets/{relpath}", axum::routing::delete(remove_asset))
}

#[derive(Deserialize)]
struct CreateRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

async fn create(State(state): State<AppState>, Json(req): Json<CreateRequest>) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    let bundle = registry.create(&req.name, req.description.as_deref()).await?;
    Ok(Json(serde_json::to_value(bundle)?))
}

async fn list(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    Ok(Json(serde_json::to_value(registry.list().await?)?))
}

async fn get_one(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    let bundle = registry.get(&name).await?;
    let assets = match &bundle {
        Some(b) => registry.assets(b.id).await?,
        None => Vec::new(),
    };
    Ok(Json(serde_json::json!({"bundle": bundle, "assets": assets})))
}

async fn delete_one(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    let ok = registry.delete(&name).await?;
    Ok(Json(serde_json::json!({"deleted": ok})))
}

#[derive(Deserialize)]
struct AddAssetRequest {
    relpath: String,
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    source_url_override: Option<String>,
}

async fn add_asset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<AddAssetRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    let ok = registry
        .add_asset(&name, &req.relpath, req.hash.as_deref(), req.source_url_override.as_deref())
        .await?;
    Ok(Json(serde_json::json!({"ok": ok})))
}

async fn remove_asset(State(state): State<AppState>, Path((name, relpath)): Path<(String, String)>) -> ApiResult<Json<serde_json::Value>> {
    let registry = BundleRegistry::new(state.store.clone());
    let ok = registry.remove_asset(&name, &relpath).await?;
    Ok(Json(serde_json::json!({"ok": ok})))
}
