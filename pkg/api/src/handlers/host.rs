use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use pkg_constants::api::HOST_VERSION;
use pkg_types::peer::HostInfo;
use tracing::info;

use crate::AppState;

/// GET /api/v1/host/info — return host metadata.
pub async fn host_info(State(state): State<AppState>) -> impl IntoResponse {
    info!("Serving host info request");

    let info = HostInfo {
        endpoint: format!("http://{}", state.listen_addr),
        version: HOST_VERSION.to_string(),
        state_store: state.store_label.clone(),
        event_seq: state.shared.events().current_seq().await,
        peer_count: state.peers.len().await,
    };

    (StatusCode::OK, Json(info)).into_response()
}
