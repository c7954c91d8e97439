use serde::{Deserialize, Serialize};
use tracing::warn;

/// Single-use message naming the identity the next starting peer adopts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffMessage {
    pub target_id: String,
}

impl HandoffMessage {
    pub fn new(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored message; malformed content decodes to `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<HandoffMessage>(data) {
            Ok(msg) if !msg.target_id.is_empty() => Some(msg),
            Ok(_) => None,
            Err(e) => {
                warn!("Ignoring unparseable handoff message: {}", e);
                None
            }
        }
    }
}

/// Request body for `POST /api/v1/handoff`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub target_id: String,
}
