use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// The single shared primary lease.
/// Stored under `PRIMARY_LEASE_KEY` as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Identity of the peer that believes it is primary
    pub holder_id: String,
    /// Last renewal, milliseconds since the Unix epoch
    pub renewed_at: i64,
}

impl LeaseRecord {
    /// A record held by `holder_id`, renewed at `now_ms`.
    pub fn new(holder_id: impl Into<String>, renewed_at: i64) -> Self {
        Self {
            holder_id: holder_id.into(),
            renewed_at,
        }
    }

    /// A record held by `holder_id`, renewed right now.
    pub fn renewed_now(holder_id: impl Into<String>) -> Self {
        Self::new(holder_id, now_millis())
    }

    /// A lease is stale once `now - renewed_at >= ttl`.
    pub fn is_stale(&self, now_ms: i64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.renewed_at) >= ttl.as_millis() as i64
    }

    pub fn is_held_by(&self, peer_id: &str) -> bool {
        self.holder_id == peer_id
    }

    /// Milliseconds since the last renewal (never negative).
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.renewed_at).max(0)
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored record. Anything unparseable, or a record without a
    /// holder, decodes to `None` so that a corrupt lock never blocks a claim.
    pub fn decode(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<LeaseRecord>(data) {
            Ok(record) if !record.holder_id.is_empty() => Some(record),
            Ok(_) => {
                warn!("Ignoring lease record with empty holder");
                None
            }
            Err(e) => {
                warn!("Ignoring unparseable lease record: {}", e);
                None
            }
        }
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
