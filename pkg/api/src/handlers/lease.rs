use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use std::sync::Arc;
use tracing::{info, warn};

use pkg_constants::state::PRIMARY_LEASE_KEY;
use pkg_state::handoff::{HandoffChannel, ensure_not_live_holder};
use pkg_types::handoff::HandoffRequest;
use pkg_types::lease::{LeaseRecord, now_millis};
use pkg_types::peer::LeaseView;
use pkg_types::validate::validate_peer_id;

use crate::AppState;

/// GET /api/v1/lease — the current lease and whether it has expired.
pub async fn get_lease(State(state): State<AppState>) -> impl IntoResponse {
    let lease = match state.shared.get(PRIMARY_LEASE_KEY).await {
        Ok(data) => data.and_then(|d| LeaseRecord::decode(&d)),
        Err(e) => {
            warn!("Failed to read lease: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let now = now_millis();
    let ttl = state.election.lease_ttl;
    let view = LeaseView {
        age_ms: lease.as_ref().map(|r| r.age_ms(now)),
        stale: lease.as_ref().is_some_and(|r| r.is_stale(now, ttl)),
        ttl_ms: ttl.as_millis() as u64,
        lease,
    };

    (StatusCode::OK, Json(view)).into_response()
}

/// POST /api/v1/handoff — designate the identity of the next starting peer.
///
/// An id that still holds a fresh lease is refused with 409. A running peer
/// hands off its own id through its engine, not through this endpoint.
pub async fn publish_handoff(
    State(state): State<AppState>,
    Json(req): Json<HandoffRequest>,
) -> impl IntoResponse {
    if let Err(e) = validate_peer_id(&req.target_id) {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let lease = match state.shared.get(PRIMARY_LEASE_KEY).await {
        Ok(data) => data.and_then(|d| LeaseRecord::decode(&d)),
        Err(e) => {
            warn!("Failed to read lease: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if let Err(e) = ensure_not_live_holder(
        lease.as_ref(),
        &req.target_id,
        now_millis(),
        state.election.lease_ttl,
    ) {
        return (StatusCode::CONFLICT, e.to_string()).into_response();
    }

    let channel = HandoffChannel::new(Arc::new(state.shared.attach("host")));
    match channel.publish(&req.target_id).await {
        Ok(()) => {
            info!("Handoff to {} published via API", req.target_id);
            (
                StatusCode::OK,
                Json(serde_json::json!({"target_id": req.target_id})),
            )
                .into_response()
        }
        Err(e) => {
            warn!("Failed to publish handoff: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
