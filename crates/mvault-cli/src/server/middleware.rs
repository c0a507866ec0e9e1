//! Admission Filter wired as `axum` middleware in front of every
//! route: classifies by `Host` header and rejects anything
//! but `/api/remote/*` on the external-tunnel horizon.

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use mvault_core::admission::{classify, is_allowed};

use crate::server::state::AppState;

pub async fn admission_filter(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let host = req.headers().get(axum::http::header::HOST).and_then(|v| v.to_str().ok());
    let horizon = classify(host, &state.config.remote_base_url);
    if !is_allowed(horizon, req.uri().path()) {
        return (StatusCode::FORBIDDEN, "forbidden on this horizon").into_response();
    }
    next.run(req).await
}

/// Extracts and validates the `Authorization: Bearer <key>` header for the
/// remote broker's agent-facing endpoints. Returns 401 when
/// missing or rejected.
pub async fn require_bearer(state: &AppState, req: &Request) -> Result<(), Response> {
    let key = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match key {
        Some(key) if state.remote.validate_key(key).await => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "invalid or missing bearer token").into_response()),
    }
}
