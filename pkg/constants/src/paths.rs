//! Filesystem path constants.

// ─── Host ─────────────────────────────────────────────────────────────────

/// Default config file path for the host.
pub const DEFAULT_HOST_CONFIG: &str = "/etc/tablock/host.yaml";

/// Default data directory for the host's SlateDB store.
pub const DEFAULT_HOST_DATA_DIR: &str = "/tmp/tablock-data";

// ─── Peer ─────────────────────────────────────────────────────────────────

/// Default config file path for a standalone peer process.
pub const DEFAULT_PEER_CONFIG: &str = "/etc/tablock/peer.yaml";
