use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use pkg_constants::state::HANDOFF_KEY;
use pkg_types::handoff::HandoffMessage;
use pkg_types::lease::LeaseRecord;
use pkg_types::validate::validate_peer_id;

use crate::medium::Medium;

/// Single-use slot naming the identity the next starting peer should adopt.
#[derive(Clone)]
pub struct HandoffChannel {
    medium: Arc<dyn Medium>,
}

impl HandoffChannel {
    pub fn new(medium: Arc<dyn Medium>) -> Self {
        Self { medium }
    }

    /// Designate `target_id` as the identity of the next peer to start.
    /// Replaces any unconsumed message.
    pub async fn publish(&self, target_id: &str) -> anyhow::Result<()> {
        validate_peer_id(target_id)?;
        let data = HandoffMessage::new(target_id).encode()?;
        self.medium.set(HANDOFF_KEY, &data).await?;
        info!("Published handoff to peer id {}", target_id);
        Ok(())
    }

    /// Read and clear the slot. A malformed message is cleared and ignored.
    pub async fn consume_if_present(&self) -> anyhow::Result<Option<String>> {
        let Some(data) = self.medium.take(HANDOFF_KEY).await? else {
            return Ok(None);
        };
        match HandoffMessage::decode(&data) {
            Some(msg) if validate_peer_id(&msg.target_id).is_ok() => Ok(Some(msg.target_id)),
            Some(msg) => {
                warn!("Discarding handoff to invalid peer id '{}'", msg.target_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

/// Refuse a handoff to an id whose owner still holds a fresh lease.
///
/// A peer adopting that id would treat the live holder's renewals as its
/// own, and both would stay primary.
pub fn ensure_not_live_holder(
    lease: Option<&LeaseRecord>,
    target_id: &str,
    now_ms: i64,
    ttl: Duration,
) -> anyhow::Result<()> {
    match lease {
        Some(record) if record.is_held_by(target_id) && !record.is_stale(now_ms, ttl) => {
            anyhow::bail!("peer {} still holds a fresh lease", target_id)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::SharedStore;

    #[tokio::test]
    async fn publish_then_consume_once() {
        let shared = SharedStore::in_memory().await.unwrap();
        let channel = HandoffChannel::new(Arc::new(shared.attach("tab-a")));

        assert_eq!(channel.consume_if_present().await.unwrap(), None);
        channel.publish("peer-x").await.unwrap();
        assert_eq!(
            channel.consume_if_present().await.unwrap().as_deref(),
            Some("peer-x")
        );
        assert_eq!(channel.consume_if_present().await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_publish_replaces_earlier() {
        let shared = SharedStore::in_memory().await.unwrap();
        let channel = HandoffChannel::new(Arc::new(shared.attach("tab-a")));
        channel.publish("peer-x").await.unwrap();
        channel.publish("peer-y").await.unwrap();
        assert_eq!(
            channel.consume_if_present().await.unwrap().as_deref(),
            Some("peer-y")
        );
    }

    #[tokio::test]
    async fn rejects_invalid_target() {
        let shared = SharedStore::in_memory().await.unwrap();
        let channel = HandoffChannel::new(Arc::new(shared.attach("tab-a")));
        assert!(channel.publish("").await.is_err());
        assert!(channel.publish("bad id").await.is_err());
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_none());
    }

    #[test]
    fn live_holder_is_not_a_handoff_target() {
        let ttl = Duration::from_secs(30);
        let record = LeaseRecord::new("peer-a", 10_000);
        assert!(ensure_not_live_holder(Some(&record), "peer-a", 10_500, ttl).is_err());
        assert!(ensure_not_live_holder(Some(&record), "peer-b", 10_500, ttl).is_ok());
        assert!(ensure_not_live_holder(Some(&record), "peer-a", 40_000, ttl).is_ok());
        assert!(ensure_not_live_holder(None, "peer-a", 10_500, ttl).is_ok());
    }

    #[tokio::test]
    async fn malformed_message_is_cleared() {
        let shared = SharedStore::in_memory().await.unwrap();
        shared.put("tab-x", HANDOFF_KEY, b"garbage").await.unwrap();
        let channel = HandoffChannel::new(Arc::new(shared.attach("tab-a")));
        assert_eq!(channel.consume_if_present().await.unwrap(), None);
        assert!(shared.get(HANDOFF_KEY).await.unwrap().is_none());
    }
}
