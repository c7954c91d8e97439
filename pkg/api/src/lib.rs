pub mod handlers;
pub mod registry;
pub mod request_id;
pub mod server;

use pkg_state::leader::ElectionConfig;
use pkg_state::medium::SharedStore;

use crate::registry::PeerRegistry;

/// Shared application state injected into all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub shared: SharedStore,
    pub peers: PeerRegistry,
    pub election: ElectionConfig,
    pub listen_addr: String,
    /// Human-readable description of the backing store
    pub store_label: String,
}
