//! Shared medium / election constants.

/// Key of the primary lease record in the shared medium.
pub const PRIMARY_LEASE_KEY: &str = "tablock.primary-lease";

/// Key of the single-use handoff slot. Distinct from the lease key.
pub const HANDOFF_KEY: &str = "tablock.handoff";

/// How long a lease stays valid without renewal, in milliseconds.
pub const LEASE_TTL_MS: u64 = 30_000;

/// The lease is renewed every `TTL / LEASE_RENEW_INTERVAL_DIVISOR`.
pub const LEASE_RENEW_INTERVAL_DIVISOR: u64 = 3;

/// Number of recent change events the host keeps for watch resumption.
pub const EVENT_LOG_CAPACITY: usize = 1024;

/// Capacity of the broadcast channel fanning change events out to peers.
pub const EVENT_BROADCAST_CAPACITY: usize = 1024;
