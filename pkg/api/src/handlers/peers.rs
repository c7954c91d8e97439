use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::warn;

use crate::AppState;

/// GET /api/v1/peers — list peers hosted in this process.
pub async fn list_peers(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.peers.list().await)).into_response()
}

/// POST /api/v1/peers — open a new peer (tab).
pub async fn open_peer(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.peers.open().await;
    (StatusCode::CREATED, Json(status)).into_response()
}

/// DELETE /api/v1/peers/{instance} — close a peer, releasing its lease.
pub async fn close_peer(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> impl IntoResponse {
    match state.peers.close(&instance).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to close {}: {}", instance, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/v1/peers/{instance}/kill — drop a peer without cleanup.
pub async fn kill_peer(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> impl IntoResponse {
    if state.peers.kill(&instance).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

/// POST /api/v1/peers/{instance}/reopen — continue this peer in a new tab.
pub async fn reopen_peer(
    State(state): State<AppState>,
    Path(instance): Path<String>,
) -> impl IntoResponse {
    match state.peers.reopen(&instance).await {
        Ok(Some(resp)) => (StatusCode::OK, Json(resp)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to reopen {}: {}", instance, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
