//! Axum web surface (§10.7): a WebSocket upgrade at `/ws` that carries the
//! control channel, and a `/health` liveness endpoint. No static-file
//! serving, no SQL-backed account routes, no TLS termination — those are
//! explicit non-goals (§1).

mod auth;
mod handlers;
mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
