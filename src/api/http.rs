//! HTTP read-only API.
//!
//! Two endpoints expose the state engine's snapshots, grouped by origin:
//!
//! - `GET /api/state`: the full register map.
//! - `GET /api/updates`: entries accepted since the previous call
//!   (clear-on-read; each accepted update appears in exactly one response).
//!
//! Responses are plain JSON with `Access-Control-Allow-Origin: *` so a
//! browser dashboard on any origin can poll the node directly. Transport
//! errors never surface here; the handlers always render the current view.

use crate::state::{group_by_origin, GroupedState, StateEngine};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    engine: Arc<StateEngine>,
}

impl ApiState {
    /// Wrap the engine for the router.
    pub fn new(engine: Arc<StateEngine>) -> Self {
        Self { engine }
    }
}

/// Build the API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/state", get(state_snapshot).options(preflight))
        .route("/api/updates", get(updates_snapshot).options(preflight))
        .fallback(not_found)
        .with_state(state)
}

/// Serve the router until the shutdown signal fires.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await
}

fn cors_json(body: GroupedState) -> Response {
    (
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(body),
    )
        .into_response()
}

async fn state_snapshot(State(state): State<ApiState>) -> Response {
    cors_json(state.engine.snapshot_state())
}

async fn updates_snapshot(State(state): State<ApiState>) -> Response {
    cors_json(group_by_origin(state.engine.drain_ui_updates()))
}

async fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
    )
        .into_response()
}

async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        [(header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
    )
        .into_response()
}
