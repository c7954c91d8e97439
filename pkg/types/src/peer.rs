use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::lease::LeaseRecord;

/// Election state of a single peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ElectionState {
    Unclaimed,
    Primary,
    Secondary,
}

impl fmt::Display for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElectionState::Unclaimed => write!(f, "Unclaimed"),
            ElectionState::Primary => write!(f, "Primary"),
            ElectionState::Secondary => write!(f, "Secondary"),
        }
    }
}

/// A peer hosted inside the host process (one simulated tab).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Origin tag of this tab on the shared medium
    pub instance: String,
    pub peer_id: String,
    pub primary: bool,
    pub opened_at: DateTime<Utc>,
}

/// Response of `POST /api/v1/peers/{instance}/reopen`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReopenResponse {
    pub closed: String,
    pub opened: PeerStatus,
}

/// Response of `GET /api/v1/lease`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseView {
    pub lease: Option<LeaseRecord>,
    pub age_ms: Option<i64>,
    pub stale: bool,
    pub ttl_ms: u64,
}

/// Response of `GET /api/v1/host/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostInfo {
    pub endpoint: String,
    pub version: String,
    pub state_store: String,
    pub event_seq: u64,
    pub peer_count: usize,
}
