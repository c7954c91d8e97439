//! Host API constants.

/// Default port the host API listens on.
pub const DEFAULT_HOST_PORT: u16 = 7480;

/// Default host endpoint used by peers and `tablockctl`.
pub const DEFAULT_HOST_URL: &str = "http://127.0.0.1:7480";

/// Request header carrying the writer's origin on medium mutations.
pub const ORIGIN_HEADER: &str = "x-tablock-origin";

/// Delay before a remote peer re-opens a dropped watch stream, in milliseconds.
pub const WATCH_RECONNECT_DELAY_MS: u64 = 1_000;

/// Version string reported by `/api/v1/host/info`.
pub const HOST_VERSION: &str = "v0.1.0+tablock";
