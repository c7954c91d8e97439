use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

use crate::AppState;
use crate::handlers::{host, kv, lease, peers, watch};
use crate::registry::PeerRegistry;
use crate::request_id::request_id_middleware;
use pkg_state::client::StateStore;
use pkg_state::leader::ElectionConfig;
use pkg_state::medium::SharedStore;

/// Host configuration passed from the binary's CLI.
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub data_dir: String,
    /// In-host peers opened at startup
    pub initial_peers: usize,
    pub election: ElectionConfig,
}

/// Build the host API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/host/info", get(host::host_info))
        // shared medium
        .route(
            "/api/v1/kv/{key}",
            get(kv::get_value).put(kv::put_value).delete(kv::delete_value),
        )
        .route("/api/v1/kv/{key}/take", post(kv::take_value))
        .route("/api/v1/watch", get(watch::watch_events))
        // election views
        .route("/api/v1/lease", get(lease::get_lease))
        .route("/api/v1/handoff", post(lease::publish_handoff))
        // hosted peers
        .route(
            "/api/v1/peers",
            get(peers::list_peers).post(peers::open_peer),
        )
        .route("/api/v1/peers/{instance}", delete(peers::close_peer))
        .route("/api/v1/peers/{instance}/kill", post(peers::kill_peer))
        .route("/api/v1/peers/{instance}/reopen", post(peers::reopen_peer))
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// Assemble the state for a host serving `shared` on `listen_addr`.
pub fn app_state(
    shared: SharedStore,
    election: ElectionConfig,
    listen_addr: String,
    store_label: String,
) -> AppState {
    AppState {
        peers: PeerRegistry::new(shared.clone(), election),
        shared,
        election,
        listen_addr,
        store_label,
    }
}

pub async fn start_server(config: ServerConfig) -> anyhow::Result<()> {
    let store = StateStore::new(&config.data_dir).await?;
    let shared = SharedStore::new(store);
    let state = app_state(
        shared.clone(),
        config.election,
        config.addr.to_string(),
        format!("SlateDB (local, {})", config.data_dir),
    );

    for _ in 0..config.initial_peers {
        state.peers.open().await;
    }

    let peers = state.peers.clone();
    let app = router(state);

    info!("Starting host API on {}", config.addr);
    let listener = TcpListener::bind(config.addr).await?;
    let mut server = tokio::spawn(async move { axum::serve(listener, app).await });

    // SSE watchers never finish on their own, so the server is torn down
    // rather than drained.
    tokio::select! {
        res = &mut server => {
            res??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested");
            server.abort();
        }
    }

    peers.close_all().await;
    shared.close().await?;
    Ok(())
}
