//! HTTP/WebSocket edge for the vault engine: routes the public API surface
//! to the core services, fronted by the admission filter that keeps the
//! remote-tunnel horizon down to agent endpoints only.

mod error;
mod middleware;
mod routes;
pub mod state;
mod ws;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(from_fn_with_state(state.clone(), middleware::admission_filter));

    Router::new()
        .merge(routes::bundle::router())
        .merge(routes::index::router())
        .merge(routes::queue::router())
        .merge(routes::dedupe::router())
        .merge(routes::source::router())
        .merge(routes::download::router())
        .merge(routes::remote::router())
        .route("/ws", get(ws::ws_handler))
        .layer(layers)
        .with_state(state)
}
