use axum::body::Body;
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mvault_core::error::Side;
use mvault_core::range_stream::{parse_range, resolve_safe_path, RangeStreamError, StreamPlan};
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::server::error::ApiResult;
use crate::server::middleware::require_bearer;
use crate::server::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/remote/status", get(status))
        .route("/api/remote/session/enable", post(session_enable))
        .route("/api/remote/session/end", post(session_end))
        .route("/api/remote/agent/register", post(agent_register))
        .route("/api/remote/agent/heartbeat", post(agent_heartbeat))
        .route("/api/remote/tasks/next", get(tasks_next))
        .route("/api/remote/tasks/progress", post(tasks_progress))
        .route("/api/remote/tasks", get(tasks_list))
        .route("/api/remote/tasks/enqueue", post(tasks_enqueue))
        .route("/api/remote/tasks/{task_id}/cancel", post(tasks_cancel))
        .route("/api/remote/assets/resolve", get(assets_resolve))
        .route("/api/remote/assets/file", get(assets_file))
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.remote.status().await).unwrap())
}

async fn session_enable(State(state): State<AppState>) -> Json<serde_json::Value> {
    let key = state.remote.enable_session().await;
    Json(serde_json::json!({"api_key": key}))
}

async fn session_end(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.remote.end_session().await;
    Json(serde_json::json!({"ok": true}))
}

async fn agent_register(State(state): State<AppState>, req: Request) -> Response {
    if let Err(resp) = require_bearer(&state, &req).await {
        return resp;
    }
    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let info: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    match state.remote.register_agent(info).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(err) => (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    }
}

async fn agent_heartbeat(State(state): State<AppState>, req: Request) -> Response {
    if let Err(resp) = require_bearer(&state, &req).await {
        return resp;
    }
    match state.remote.heartbeat().await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(err) => (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    }
}

async fn tasks_next(State(state): State<AppState>, req: Request) -> Response {
    if let Err(resp) = require_bearer(&state, &req).await {
        return resp;
    }
    match state.remote.next_task().await {
        Ok(task) => Json(serde_json::json!({"task": task})).into_response(),
        Err(err) => (StatusCode::UNAUTHORIZED, err.to_string()).into_response(),
    }
}

async fn tasks_progress(State(state): State<AppState>, req: Request) -> Response {
    if let Err(resp) = require_bearer(&state, &req).await {
        return resp;
    }
    #[derive(Deserialize)]
    struct ProgressRequest {
        task_id: String,
        #[serde(flatten)]
        update: mvault_core::remote::ProgressUpdate,
    }
    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(b) => b,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let parsed: ProgressRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    match state.remote.progress(&parsed.task_id, parsed.update).await {
        Ok(()) => Json(serde_json::json!({"ok": true})).into_response(),
        Err(err) => (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    }
}

async fn tasks_list(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.remote.list_tasks().await).unwrap())
}

#[derive(Deserialize)]
struct EnqueueRequest {
    task_type: String,
    payload: serde_json::Value,
}

async fn tasks_enqueue(State(state): State<AppState>, Json(req): Json<EnqueueRequest>) -> ApiResult<Json<serde_json::Value>> {
    let task = state.remote.enqueue_task(&req.task_type, req.payload).await?;
    Ok(Json(serde_json::to_value(task)?))
}

async fn tasks_cancel(State(state): State<AppState>, Path(task_id): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    state.remote.cancel_task(&task_id).await?;
    Ok(Json(serde_json::json!({"ok": true})))
}

#[derive(Deserialize)]
struct ResolveQuery {
    #[serde(default)]
    hash: Option<String>,
    #[serde(default)]
    relpath: Option<String>,
}

async fn assets_resolve(State(state): State<AppState>, Query(q): Query<ResolveQuery>) -> ApiResult<Json<serde_json::Value>> {
    let sources = state.resolver.resolve(q.hash.as_deref(), q.relpath.as_deref()).await?;
    Ok(Json(serde_json::json!({"hash": q.hash, "relpath": q.relpath, "sources": sources})))
}

#[derive(Deserialize)]
struct FileQuery {
    side: String,
    relpath: String,
}

async fn assets_file(State(state): State<AppState>, Query(q): Query<FileQuery>, req: Request) -> Response {
    let side = match Side::from_str(&q.side) {
        Some(s) => s,
        None => return (StatusCode::BAD_REQUEST, "side must be 'local' or 'lake'").into_response(),
    };
    let root = state.roots.of(side);
    let path = match resolve_safe_path(root, &q.relpath) {
        Ok(p) => p,
        Err(RangeStreamError::InvalidPath) => return (StatusCode::BAD_REQUEST, "invalid relpath").into_response(),
        Err(RangeStreamError::RangeNotSatisfiable { .. }) => unreachable!(),
    };

    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return (StatusCode::NOT_FOUND, "file not found").into_response(),
    };
    let size = match file.metadata().await {
        Ok(m) => m.len(),
        Err(err) => return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    };

    let range_header = req.headers().get(header::RANGE).and_then(|v| v.to_str().ok());
    let plan = match parse_range(range_header, size) {
        Ok(plan) => plan,
        Err(RangeStreamError::RangeNotSatisfiable { size }) => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{size}"))
                .body(Body::empty())
                .unwrap();
        }
        Err(RangeStreamError::InvalidPath) => unreachable!(),
    };

    let builder = Response::builder()
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_LENGTH, plan.content_length());
    let builder = match plan.content_range_header() {
        Some(range) => builder.status(StatusCode::PARTIAL_CONTENT).header(header::CONTENT_RANGE, range),
        None => builder.status(StatusCode::OK),
    };

    let body = match plan {
        StreamPlan::Whole { .. } => Body::from_stream(ReaderStream::new(file)),
        StreamPlan::Partial { start, end, .. } => {
            if let Err(err) = file.seek(std::io::SeekFrom::Start(start)).await {
                return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
            }
            let limited = file.take(end - start + 1);
            Body::from_stream(ReaderStream::new(limited))
        }
    };

    builder.body(body).unwrap()
}
