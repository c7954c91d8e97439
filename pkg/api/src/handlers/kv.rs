use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use pkg_constants::api::ORIGIN_HEADER;
use tracing::warn;

use crate::AppState;

fn origin(headers: &HeaderMap) -> String {
    headers
        .get(ORIGIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// GET /api/v1/kv/{key} — raw value, or 404.
pub async fn get_value(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    match state.shared.get(&key).await {
        Ok(Some(value)) => (StatusCode::OK, value).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to read {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// PUT /api/v1/kv/{key} — unconditional overwrite by the calling origin.
pub async fn put_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    match state.shared.put(&origin(&headers), &key, &body).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!("Failed to write {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// DELETE /api/v1/kv/{key} — no-op if absent.
pub async fn delete_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match state.shared.delete(&origin(&headers), &key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            warn!("Failed to delete {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// POST /api/v1/kv/{key}/take — read and delete in one step, or 404.
pub async fn take_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    match state.shared.take(&origin(&headers), &key).await {
        Ok(Some(value)) => (StatusCode::OK, value).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!("Failed to take {}: {}", key, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
